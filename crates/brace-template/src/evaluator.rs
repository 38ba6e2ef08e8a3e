/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Host script evaluation engine.
//!
//! This module executes a parsed [`Program`] against a data context. The
//! interpreter walks the AST directly; all state it needs lives in an
//! [`EvalContext`] (output and functions) and a [`Frame`] (variables).

use crate::ast::{
    BinaryOp, Expr, ForStmt, ForeachStmt, FunctionDef, IfStmt, LogicalOp, Program, Stmt, StrPart,
    SwitchStmt, UnaryOp,
};
use crate::builtins::call_builtin;
use crate::context::{DataContext, Number, Value, list_index, map_key_value};
use crate::error::{TemplateError, TemplateResult};
use crate::eval_context::{EvalContext, Frame};
use indexmap::IndexMap;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A place expression reduced to its root variable and evaluated keys.
///
/// A `None` key is the append form `$a[]`.
struct Place {
    root: String,
    keys: Vec<Option<Value>>,
}

/// Execute a program and return its output.
pub fn execute(
    program: &Program,
    data: &DataContext,
    mut ctx: EvalContext,
) -> TemplateResult<String> {
    for def in program.functions() {
        ctx.define_function(def)?;
    }

    let mut frame = Frame::from_data(data);
    match exec_block(&program.body, &mut ctx, &mut frame)? {
        Flow::Normal | Flow::Return(_) => Ok(ctx.into_output()),
        Flow::Break => Err(misplaced("break")),
        Flow::Continue => Err(misplaced("continue")),
    }
}

fn misplaced(keyword: &str) -> TemplateError {
    TemplateError::syntax(
        format!("'{}' not in the 'loop' or 'switch' context", keyword),
        0,
    )
}

fn exec_block(stmts: &[Stmt], ctx: &mut EvalContext, frame: &mut Frame) -> TemplateResult<Flow> {
    for stmt in stmts {
        let flow = exec_stmt(stmt, ctx, frame)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn exec_stmt(stmt: &Stmt, ctx: &mut EvalContext, frame: &mut Frame) -> TemplateResult<Flow> {
    match stmt {
        Stmt::Text(text) => ctx.write(text),

        Stmt::Echo(exprs) => {
            for expr in exprs {
                let value = eval(expr, ctx, frame)?;
                ctx.write(&value.render());
            }
        }

        Stmt::Expr(expr) => {
            eval(expr, ctx, frame)?;
        }

        Stmt::If(stmt) => return exec_if(stmt, ctx, frame),
        Stmt::Foreach(stmt) => return exec_foreach(stmt, ctx, frame),
        Stmt::For(stmt) => return exec_for(stmt, ctx, frame),
        Stmt::Switch(stmt) => return exec_switch(stmt, ctx, frame),
        Stmt::Function(def) => ctx.define_function(def)?,

        Stmt::Break => return Ok(Flow::Break),
        Stmt::Continue => return Ok(Flow::Continue),
        Stmt::Return(expr) => {
            let value = match expr {
                Some(expr) => eval(expr, ctx, frame)?,
                None => Value::Null,
            };
            return Ok(Flow::Return(value));
        }
    }
    Ok(Flow::Normal)
}

fn exec_if(stmt: &IfStmt, ctx: &mut EvalContext, frame: &mut Frame) -> TemplateResult<Flow> {
    for (condition, body) in &stmt.branches {
        if eval(condition, ctx, frame)?.is_truthy() {
            return exec_block(body, ctx, frame);
        }
    }
    match &stmt.else_branch {
        Some(body) => exec_block(body, ctx, frame),
        None => Ok(Flow::Normal),
    }
}

fn exec_foreach(
    stmt: &ForeachStmt,
    ctx: &mut EvalContext,
    frame: &mut Frame,
) -> TemplateResult<Flow> {
    let subject = eval(&stmt.subject, ctx, frame)?;
    if subject == Value::Null {
        return Ok(Flow::Normal);
    }
    // Iterate a snapshot, so the body may reassign the subject
    let entries: Vec<(Value, Value)> = subject
        .entries()
        .ok_or_else(|| {
            TemplateError::type_mismatch(format!(
                "foreach() argument must be of type array, {} given",
                subject.type_name()
            ))
        })?
        .into_iter()
        .map(|(key, value)| (key, value.clone()))
        .collect();

    for (key, value) in entries {
        if let Some(key_name) = &stmt.key {
            frame.set(key_name.as_str(), key);
        }
        frame.set(stmt.value.as_str(), value);
        match exec_block(&stmt.body, ctx, frame)? {
            Flow::Break => break,
            Flow::Normal | Flow::Continue => {}
            flow @ Flow::Return(_) => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

fn exec_for(stmt: &ForStmt, ctx: &mut EvalContext, frame: &mut Frame) -> TemplateResult<Flow> {
    for expr in &stmt.init {
        eval(expr, ctx, frame)?;
    }
    loop {
        // Only the last condition expression decides
        let mut proceed = true;
        for expr in &stmt.condition {
            proceed = eval(expr, ctx, frame)?.is_truthy();
        }
        if !proceed {
            break;
        }
        match exec_block(&stmt.body, ctx, frame)? {
            Flow::Break => break,
            Flow::Normal | Flow::Continue => {}
            flow @ Flow::Return(_) => return Ok(flow),
        }
        for expr in &stmt.step {
            eval(expr, ctx, frame)?;
        }
    }
    Ok(Flow::Normal)
}

fn exec_switch(
    stmt: &SwitchStmt,
    ctx: &mut EvalContext,
    frame: &mut Frame,
) -> TemplateResult<Flow> {
    let subject = eval(&stmt.subject, ctx, frame)?;

    let mut start = None;
    for (index, arm) in stmt.arms.iter().enumerate() {
        if let Some(label) = &arm.label {
            if eval(label, ctx, frame)?.loose_eq(&subject) {
                start = Some(index);
                break;
            }
        }
    }
    let start = start.or_else(|| stmt.arms.iter().position(|arm| arm.label.is_none()));
    let Some(start) = start else {
        return Ok(Flow::Normal);
    };

    for arm in &stmt.arms[start..] {
        match exec_block(&arm.body, ctx, frame)? {
            Flow::Normal => {}
            // A switch counts as a loop structure: continue acts like break
            Flow::Break | Flow::Continue => break,
            flow @ Flow::Return(_) => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

/// Evaluate an expression.
fn eval(expr: &Expr, ctx: &mut EvalContext, frame: &mut Frame) -> TemplateResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Interpolated(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    StrPart::Literal(text) => out.push_str(text),
                    StrPart::Variable(name) => out.push_str(&read_variable(frame, name)?.render()),
                }
            }
            Ok(Value::String(out))
        }

        Expr::Array(items) => eval_array(items, ctx, frame),

        Expr::Variable(name) => read_variable(frame, name).cloned(),

        Expr::Index { .. } | Expr::Member { .. } if expr.is_place() => {
            let place = resolve_place(expr, ctx, frame)?;
            read_place(&place, frame).cloned()
        }

        Expr::Index { base, index } => {
            let base = eval(base, ctx, frame)?;
            let Some(index) = index else {
                return Err(TemplateError::type_mismatch("Cannot use [] for reading"));
            };
            let key = eval(index, ctx, frame)?;
            base.index(&key).cloned()
        }

        Expr::Member { base, name } => {
            let base = eval(base, ctx, frame)?;
            base.index(&Value::String(name.clone())).cloned()
        }

        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, ctx, frame)?);
            }
            call_function(name, values, ctx)
        }

        Expr::Unary { op, operand } => {
            let value = eval(operand, ctx, frame)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Plus => Ok(value.to_number("+")?.into_value()),
                UnaryOp::Neg => Ok(match value.to_number("-")? {
                    Number::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .unwrap_or(Value::Float(-(i as f64))),
                    Number::Float(f) => Value::Float(-f),
                }),
            }
        }

        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, ctx, frame)?;
            let rhs = eval(rhs, ctx, frame)?;
            binary(*op, &lhs, &rhs)
        }

        Expr::Logical { op, lhs, rhs } => match op {
            LogicalOp::And => Ok(Value::Bool(
                eval(lhs, ctx, frame)?.is_truthy() && eval(rhs, ctx, frame)?.is_truthy(),
            )),
            LogicalOp::Or => Ok(Value::Bool(
                eval(lhs, ctx, frame)?.is_truthy() || eval(rhs, ctx, frame)?.is_truthy(),
            )),
            LogicalOp::Coalesce => match quiet_read(lhs, ctx, frame)? {
                Some(value) if value != Value::Null => Ok(value),
                _ => eval(rhs, ctx, frame),
            },
        },

        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            let condition = eval(condition, ctx, frame)?;
            if !condition.is_truthy() {
                return eval(otherwise, ctx, frame);
            }
            match then {
                Some(then) => eval(then, ctx, frame),
                None => Ok(condition),
            }
        }

        Expr::Assign { op, target, value } => {
            let value = eval(value, ctx, frame)?;
            let place = resolve_place(target, ctx, frame)?;
            let value = match op {
                None => value,
                Some(op) => {
                    let current = quiet_read_place(&place, frame)?.cloned().unwrap_or_default();
                    binary(*op, &current, &value)?
                }
            };
            *place_slot(&place, frame)? = value.clone();
            Ok(value)
        }

        Expr::IncDec {
            target,
            increment,
            prefix,
        } => {
            let place = resolve_place(target, ctx, frame)?;
            let current = quiet_read_place(&place, frame)?.cloned().unwrap_or_default();
            let updated = match (&current, increment) {
                // null-- stays null
                (Value::Null, false) => Value::Null,
                (Value::Null, true) => Value::Int(1),
                (_, true) => binary(BinaryOp::Add, &current, &Value::Int(1))?,
                (_, false) => binary(BinaryOp::Sub, &current, &Value::Int(1))?,
            };
            *place_slot(&place, frame)? = updated.clone();
            Ok(if *prefix { updated } else { current })
        }

        Expr::Isset(exprs) => {
            for expr in exprs {
                match quiet_read(expr, ctx, frame)? {
                    Some(value) if value != Value::Null => {}
                    _ => return Ok(Value::Bool(false)),
                }
            }
            Ok(Value::Bool(true))
        }

        Expr::Empty(expr) => {
            let value = quiet_read(expr, ctx, frame)?;
            Ok(Value::Bool(!value.is_some_and(|v| v.is_truthy())))
        }
    }
}

fn read_variable<'f>(frame: &'f Frame, name: &str) -> TemplateResult<&'f Value> {
    frame.get(name).ok_or_else(|| TemplateError::UndefinedVariable {
        name: name.to_string(),
    })
}

fn eval_array(
    items: &[(Option<Expr>, Expr)],
    ctx: &mut EvalContext,
    frame: &mut Frame,
) -> TemplateResult<Value> {
    if items.iter().all(|(key, _)| key.is_none()) {
        let mut list = Vec::with_capacity(items.len());
        for (_, value) in items {
            list.push(eval(value, ctx, frame)?);
        }
        return Ok(Value::List(list));
    }

    let mut map = IndexMap::new();
    for (key, value) in items {
        let key = match key {
            Some(key) => eval(key, ctx, frame)?.render(),
            None => next_index(&map).to_string(),
        };
        let value = eval(value, ctx, frame)?;
        map.insert(key, value);
    }
    Ok(Value::Map(map))
}

/// Next integer key for an append into a map.
fn next_index(map: &IndexMap<String, Value>) -> i64 {
    map.keys()
        .filter_map(|key| match map_key_value(key) {
            Value::Int(i) if i >= 0 => Some(i + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

fn call_function(
    name: &str,
    args: Vec<Value>,
    ctx: &mut EvalContext,
) -> TemplateResult<Value> {
    if let Some(result) = call_builtin(name, &args, ctx) {
        return result;
    }

    let def = ctx
        .function(name)
        .ok_or_else(|| TemplateError::UndefinedFunction {
            name: name.to_string(),
        })?;
    if ctx.call_depth >= ctx.max_call_depth {
        return Err(TemplateError::CallDepthExceeded {
            name: name.to_string(),
            max_depth: ctx.max_call_depth,
        });
    }

    tracing::trace!(function = %name, depth = ctx.call_depth, "calling template function");
    ctx.call_depth += 1;
    let result = invoke(&def, args, ctx);
    ctx.call_depth -= 1;
    result
}

fn invoke(def: &FunctionDef, args: Vec<Value>, ctx: &mut EvalContext) -> TemplateResult<Value> {
    let mut frame = Frame::new();
    let given = args.len();
    let mut args = args.into_iter();
    for param in &def.params {
        let value = match (args.next(), &param.default) {
            (Some(value), _) => value,
            (None, Some(default)) => eval(default, ctx, &mut frame)?,
            (None, None) => {
                let required = def.params.iter().filter(|p| p.default.is_none()).count();
                return Err(TemplateError::type_mismatch(format!(
                    "Too few arguments to function {}(), {} passed and at least {} expected",
                    def.name, given, required
                )));
            }
        };
        frame.set(param.name.as_str(), value);
    }

    match exec_block(&def.body, ctx, &mut frame)? {
        Flow::Normal => Ok(Value::Null),
        Flow::Return(value) => Ok(value),
        Flow::Break => Err(misplaced("break")),
        Flow::Continue => Err(misplaced("continue")),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> TemplateResult<Value> {
    match op {
        BinaryOp::Concat => {
            let mut out = lhs.render();
            out.push_str(&rhs.render());
            Ok(Value::String(out))
        }
        BinaryOp::Eq => Ok(Value::Bool(lhs.loose_eq(rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!lhs.loose_eq(rhs))),
        BinaryOp::Identical => Ok(Value::Bool(lhs.strict_eq(rhs))),
        BinaryOp::NotIdentical => Ok(Value::Bool(!lhs.strict_eq(rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = lhs.loose_cmp(rhs);
            Ok(Value::Bool(match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o.is_lt(),
                (BinaryOp::Le, Some(o)) => o.is_le(),
                (BinaryOp::Gt, Some(o)) => o.is_gt(),
                (_, Some(o)) => o.is_ge(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let symbol = op.symbol();
            arithmetic(op, lhs.to_number(symbol)?, rhs.to_number(symbol)?)
        }
    }
}

/// Integer arithmetic overflowing into floats, as the host language does.
fn arithmetic(op: BinaryOp, lhs: Number, rhs: Number) -> TemplateResult<Value> {
    if let (Number::Int(a), Number::Int(b)) = (lhs, rhs) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b == 0 => return Err(TemplateError::DivisionByZero),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Div => None,
            BinaryOp::Mod if b == 0 => return Err(TemplateError::DivisionByZero),
            BinaryOp::Mod => Some(a.checked_rem(b).unwrap_or(0)),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::Int(result));
        }
    }

    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(TemplateError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Mod => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                return Err(TemplateError::DivisionByZero);
            }
            return Ok(Value::Int(a.checked_rem(b).unwrap_or(0)));
        }
        _ => unreachable!("not an arithmetic operator"),
    };
    Ok(Value::Float(result))
}

// Places

fn resolve_place(expr: &Expr, ctx: &mut EvalContext, frame: &mut Frame) -> TemplateResult<Place> {
    match expr {
        Expr::Variable(name) => Ok(Place {
            root: name.clone(),
            keys: Vec::new(),
        }),
        Expr::Index { base, index } => {
            let mut place = resolve_place(base, ctx, frame)?;
            let key = match index {
                Some(index) => Some(eval(index, ctx, frame)?),
                None => None,
            };
            place.keys.push(key);
            Ok(place)
        }
        Expr::Member { base, name } => {
            let mut place = resolve_place(base, ctx, frame)?;
            place.keys.push(Some(Value::String(name.clone())));
            Ok(place)
        }
        _ => Err(TemplateError::type_mismatch(
            "expression is not a variable, index or property",
        )),
    }
}

fn read_place<'f>(place: &Place, frame: &'f Frame) -> TemplateResult<&'f Value> {
    let mut current = read_variable(frame, &place.root)?;
    for key in &place.keys {
        let Some(key) = key else {
            return Err(TemplateError::type_mismatch("Cannot use [] for reading"));
        };
        current = current.index(key)?;
    }
    Ok(current)
}

/// Like [`read_place`], but missing variables and keys yield `None`.
fn quiet_read_place<'f>(place: &Place, frame: &'f Frame) -> TemplateResult<Option<&'f Value>> {
    let mut current = frame.get(&place.root);
    for key in &place.keys {
        let Some(key) = key else {
            return Err(TemplateError::type_mismatch("Cannot use [] for reading"));
        };
        current = current.and_then(|value| value.get(key));
    }
    Ok(current)
}

/// Quiet lookup for `isset`, `empty` and `??`.
fn quiet_read(
    expr: &Expr,
    ctx: &mut EvalContext,
    frame: &mut Frame,
) -> TemplateResult<Option<Value>> {
    if expr.is_place() {
        let place = resolve_place(expr, ctx, frame)?;
        return Ok(quiet_read_place(&place, frame)?.cloned());
    }
    eval(expr, ctx, frame).map(Some)
}

/// Writable slot for a place, creating intermediate containers as needed.
fn place_slot<'f>(place: &Place, frame: &'f mut Frame) -> TemplateResult<&'f mut Value> {
    let mut slot = frame.slot(&place.root);
    for key in &place.keys {
        slot = child_slot(slot, key.as_ref())?;
    }
    Ok(slot)
}

fn child_slot<'v>(container: &'v mut Value, key: Option<&Value>) -> TemplateResult<&'v mut Value> {
    if *container == Value::Null {
        *container = match key {
            None => Value::List(Vec::new()),
            Some(_) => Value::Map(IndexMap::new()),
        };
    }

    // Lists only grow at the end; any other key turns the list into a map
    let spill = match (&*container, key) {
        (Value::List(items), Some(key)) => !list_index(key).is_some_and(|i| i <= items.len()),
        _ => false,
    };
    if spill {
        if let Value::List(items) = std::mem::take(container) {
            *container = Value::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| (i.to_string(), value))
                    .collect(),
            );
        }
    }

    match container {
        Value::List(items) => {
            let index = key.and_then(list_index).unwrap_or(items.len());
            if index == items.len() {
                items.push(Value::Null);
            }
            Ok(&mut items[index])
        }
        Value::Map(map) => {
            let name = match key {
                Some(key) => key.render(),
                None => next_index(map).to_string(),
            };
            Ok(map.entry(name).or_default())
        }
        other => Err(TemplateError::type_mismatch(format!(
            "Cannot use a value of type {} as an array",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn run(source: &str, data: &DataContext) -> TemplateResult<String> {
        execute(&parse(source)?, data, EvalContext::new())
    }

    fn render(source: &str) -> String {
        run(source, &DataContext::new()).unwrap()
    }

    fn render_with(source: &str, data: serde_json::Value) -> String {
        run(source, &DataContext::from_json(data).unwrap()).unwrap()
    }

    #[test]
    fn test_text_and_echo() {
        assert_eq!(render("plain"), "plain");
        assert_eq!(render("a<?tpl echo 'b', 1 + 1; ?>c"), "ab2c");
        assert_eq!(render("<?tpl echo true, false, null, 2.0 ?>"), "12");
    }

    #[test]
    fn test_conditionals() {
        let source = "<?tpl if($n > 1){ ?>many<?tpl }elseif($n == 1){ ?>one<?tpl }else{ ?>none<?tpl } ?>";
        assert_eq!(render_with(source, serde_json::json!({"n": 5})), "many");
        assert_eq!(render_with(source, serde_json::json!({"n": 1})), "one");
        assert_eq!(render_with(source, serde_json::json!({"n": 0})), "none");
    }

    #[test]
    fn test_foreach_list_and_map() {
        let data = serde_json::json!({"items": ["a", "b"], "user": {"x": 1, "y": 2}});
        assert_eq!(
            render_with("<?tpl foreach($items as $i => $v){ echo $i, $v; } ?>", data.clone()),
            "0a1b"
        );
        assert_eq!(
            render_with("<?tpl foreach($user as $k => $v){ echo $k, '=', $v, ';'; } ?>", data),
            "x=1;y=2;"
        );
    }

    #[test]
    fn test_foreach_null_and_scalar() {
        assert_eq!(render("<?tpl foreach(null as $v){ echo 'x'; } ?>done"), "done");
        let err = run("<?tpl foreach(3 as $v){ } ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn test_loop_control() {
        assert_eq!(
            render("<?tpl foreach([1,2,3,4] as $v){ if($v == 2){ continue; } if($v == 4){ break; } echo $v; } ?>"),
            "13"
        );
        assert_eq!(
            render("<?tpl for($i = 0, $j = 10; $i < 3; $i++, $j--){ echo $i, ':', $j, ' '; } ?>"),
            "0:10 1:9 2:8 "
        );
    }

    #[test]
    fn test_switch_fallthrough_and_default() {
        let source = "<?tpl switch($x){ case 1: echo 'one'; case 2: echo 'two'; break; default: echo 'other'; } ?>";
        assert_eq!(render_with(source, serde_json::json!({"x": 1})), "onetwo");
        assert_eq!(render_with(source, serde_json::json!({"x": "2"})), "two");
        assert_eq!(render_with(source, serde_json::json!({"x": 9})), "other");
    }

    #[test]
    fn test_continue_in_switch_acts_as_break() {
        assert_eq!(
            render("<?tpl foreach([1,2] as $v){ switch($v){ case 1: continue; } echo $v; } ?>"),
            "12"
        );
    }

    #[test]
    fn test_functions() {
        assert_eq!(
            render("<?tpl echo greet('Ann'); function greet($n, $g = 'Hi'){ return $g . ' ' . $n; } ?>"),
            "Hi Ann"
        );
        assert_eq!(
            render("<?tpl function fact($n){ if($n <= 1){ return 1; } return $n * fact($n - 1); } echo fact(5); ?>"),
            "120"
        );
    }

    #[test]
    fn test_function_frames_are_isolated() {
        let err = run(
            "<?tpl function f(){ return $outer; } echo f(); ?>",
            DataContext::new().assign("outer", 1),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable { ref name } if name == "outer"));
    }

    #[test]
    fn test_function_errors() {
        let err = run("<?tpl nope(); ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedFunction { .. }));

        let err = run("<?tpl function f($a){ } f(); ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));

        let program = parse("<?tpl function f(){ return f(); } f(); ?>").unwrap();
        let err = execute(
            &program,
            &DataContext::new(),
            EvalContext::new().with_max_call_depth(20),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::CallDepthExceeded { .. }));

        let err = run(
            "<?tpl if(true){ function f(){ } } if(true){ function f(){ } } ?>",
            &DataContext::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::FunctionRedeclared { .. }));
    }

    #[test]
    fn test_call_depth_limit_is_configurable() {
        let program = parse("<?tpl function f($n){ return $n > 0 ? f($n - 1) : 'ok'; } echo f(5); ?>").unwrap();
        let data = DataContext::new();
        assert_eq!(
            execute(&program, &data, EvalContext::new().with_max_call_depth(10)).unwrap(),
            "ok"
        );
        assert!(execute(&program, &data, EvalContext::new().with_max_call_depth(3)).is_err());
    }

    #[test]
    fn test_undefined_lookups_are_errors() {
        let err = run("<?tpl echo $missing; ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable { ref name } if name == "missing"));

        let data = DataContext::from_json(serde_json::json!({"user": {"name": "Ann"}})).unwrap();
        let err = run("<?tpl echo $user['email']; ?>", &data).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedKey { .. }));
        let err = run("<?tpl echo $user['name']['x']; ?>", &data).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn test_quiet_lookups() {
        let data = serde_json::json!({"user": {"name": "Ann", "zero": 0}});
        assert_eq!(
            render_with(
                "<?tpl echo isset($user['name']) ? 'y' : 'n', isset($user['email']) ? 'y' : 'n', isset($nope) ? 'y' : 'n'; ?>",
                data.clone()
            ),
            "ynn"
        );
        assert_eq!(
            render_with("<?tpl echo empty($user['zero']) ? 'e' : 'f', empty($x) ? 'e' : 'f'; ?>", data.clone()),
            "ee"
        );
        assert_eq!(
            render_with("<?tpl echo $user['email'] ?? 'none', $user->name ?? 'x'; ?>", data),
            "noneAnn"
        );
    }

    #[test]
    fn test_assignment_and_autovivification() {
        assert_eq!(
            render("<?tpl $a['x']['y'] = 1; $b[] = 'p'; $b[] = 'q'; echo $a['x']['y'], implode(',', $b); ?>"),
            "1p,q"
        );
        assert_eq!(render("<?tpl $s = 'a'; $s .= 'b'; $n = 2; $n *= 3; echo $s, $n; ?>"), "ab6");
        assert_eq!(render("<?tpl $l = [1]; $l['k'] = 2; echo count($l), $l[0]; ?>"), "21");
        let err = run("<?tpl $n = 1; $n['x'] = 2; ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn test_increment_decrement() {
        assert_eq!(render("<?tpl $i = 1; echo $i++, $i, ++$i, $i--, --$i; ?>"), "12331");
        assert_eq!(render("<?tpl $u++; echo $u; ?>"), "1");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(render("<?tpl echo 7 / 2, ' ', 6 / 3, ' ', 7 % 3, ' ', -7 % 3; ?>"), "3.5 2 1 -1");
        assert_eq!(render("<?tpl echo '3' + 4, ' ', 1.5 * 2; ?>"), "7 3");
        assert_eq!(
            render("<?tpl echo 9223372036854775807 + 1; ?>"),
            "9223372036854775808"
        );
        let err = run("<?tpl echo 1 / 0; ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::DivisionByZero));
        let err = run("<?tpl echo 'abc' + 1; ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn test_comparison_and_logic() {
        assert_eq!(
            render("<?tpl echo (1 == '1') ? 'a' : '', (1 === '1') ? 'b' : '', ('abc' < 'abd') ? 'c' : '', (!0 && 1) ? 'd' : ''; ?>"),
            "acd"
        );
        assert_eq!(render("<?tpl echo 0 ?: 'fallback'; ?>"), "fallback");
    }

    #[test]
    fn test_short_circuit() {
        assert_eq!(render("<?tpl echo (false && $missing) ? 'x' : 'y'; ?>"), "y");
        assert_eq!(render("<?tpl echo (true || $missing) ? 'x' : 'y'; ?>"), "x");
    }

    #[test]
    fn test_interpolated_strings() {
        assert_eq!(
            render_with(r#"<?tpl echo "Hello $name!"; ?>"#, serde_json::json!({"name": "Ann"})),
            "Hello Ann!"
        );
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(
            render("<?tpl $m = ['a' => 1, 2, 'b' => 3]; foreach($m as $k => $v){ echo $k, $v; } ?>"),
            "a1021b3"
        );
    }

    #[test]
    fn test_output_buffer_capture() {
        assert_eq!(
            render("<?tpl ob_start(); echo '<b>'; $c = ob_get_clean(); echo htmlspecialchars($c); ?>"),
            "&lt;b&gt;"
        );
    }

    #[test]
    fn test_top_level_break_is_error() {
        let err = run("<?tpl break; ?>", &DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_return_stops_rendering() {
        assert_eq!(render("a<?tpl return; ?>b"), "a");
    }
}
