//! Assembly sources shared by the integration tests.
#![allow(dead_code)]

/// `function f(a) { var x = a; if (a) { x = x + 1; } return x; }`
pub const IF_STATEMENT: &str = r#"
function f(args=1, registers=3) {
  const 0 = number 1
entry:
  move r1, r0
  jump_if r0, then, else
then:
  load_const r2, #0
  add r1, r1, r2
  jump join
else:
  jump join
join:
  return r1
}
"#;

/// Sum of `j` over `0 <= j < i < n`.
pub const NESTED_LOOPS: &str = r#"
function nested(args=1, registers=6) {
  const 0 = number 1
entry:
  load_int r1, 0        ; total
  load_int r2, 0        ; i
  jump outer
outer:
  lt r3, r2, r0
  jump_if r3, outer_body, done
outer_body:
  load_int r4, 0        ; j
  jump inner
inner:
  lt r3, r4, r2
  jump_if r3, inner_body, outer_next
inner_body:
  add r1, r1, r4
  load_const r5, #0
  add r4, r4, r5
  jump inner
outer_next:
  load_const r5, #0
  add r2, r2, r5
  jump outer
done:
  return r1
}
"#;

/// `try { x = a - 10 } catch (e) { return "caught: " + e } return x`
pub const TRY_CATCH: &str = r#"
function guarded(args=1, registers=4) {
  const 0 = string "caught: "
entry:
  load_int r1, 10
  jump try
try [handler=catch]:
  sub r2, r0, r1
  move r1, r2
  jump after
after:
  return r1
catch:
  exception r3
  load_const r2, #0
  add r2, r2, r3
  return r2
}
"#;

/// A protected region that cannot throw.
pub const DEAD_HANDLER: &str = r#"
function safe(args=1, registers=2) {
entry [handler=catch]:
  move r1, r0
  jump exit
exit:
  return r1
catch:
  exception r1
  return r1
}
"#;

/// Generator yielding `0, 1, 2` and returning `3`. `r0` is the resume state.
pub const GENERATOR: &str = r#"
function counter(args=1, registers=4) {
  const 0 = table { 0 -> start, 1 -> resume }
  const 1 = number 1
entry:
  jump_table r0, #0
start:
  load_int r1, 0
  jump head
head:
  load_int r2, 3
  lt r3, r1, r2
  jump_if r3, body, done
body:
  yield r1, resume
resume:
  load_const r2, #1
  add r1, r1, r2
  jump head
done:
  return r1
}
"#;

/// Async function whose awaited continuation is protected by a handler.
pub const ASYNC_GUARD: &str = r#"
function fetch(args=1, registers=3) {
  const 0 = string "failed"
entry:
  move r1, r0
  jump wait
wait [handler=recover]:
  await r1, done
done:
  typeof r2, r1
  return r2
recover:
  load_const r2, #0
  return r2
}
"#;

/// Objects, globals and the operand stack.
pub const OBJECTS: &str = r#"
function props(args=1, registers=5) {
  const 0 = string "count"
  const 1 = string "total"
entry:
  new_object r1
  load_const r2, #0
  set_prop r1, r2, r0
  jump read
read:
  get_prop r3, r1, r2
  push r3
  push r1
  pop r4
  pop r3
  set_global #1, r3
  get_global r3, #1
  jump finish
finish:
  strict_eq r2, r3, r0
  jump_if r2, yes, no
yes:
  return r4
no:
  return r3
}
"#;

/// Throws through a chain of nested handlers.
pub const NESTED_HANDLERS: &str = r#"
function rethrow(args=1, registers=4) {
  const 0 = string "inner:"
  const 1 = string "outer:"
entry:
  load_undefined r1
  jump inner_try
inner_try [handler=inner_catch]:
  get_prop r2, r0, r1
  return r2
inner_catch [handler=outer_catch]:
  exception r2
  load_const r3, #0
  add r3, r3, r2
  throw r3
outer_catch:
  exception r2
  load_const r3, #1
  add r3, r3, r2
  return r3
}
"#;
