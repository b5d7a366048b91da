//! QuickJS Engine
//!
//! [`ScriptEngine`] implementation on top of `rquickjs`. Each engine owns its
//! own QuickJS runtime and context, so scripts never share heap state.

mod convert;

use std::sync::Arc;

use rquickjs::context::EvalOptions;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Exception, Function, Object, Runtime, Value as JsValue};

use crate::{
    Binding, Bindings, CancelToken, EngineError, EngineFactory, EngineResult, HostObject,
    ScriptEngine,
};

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Factory registered in the default [`EngineCatalog`](crate::EngineCatalog).
pub struct QuickJsFactory;

impl EngineFactory for QuickJsFactory {
    fn name(&self) -> &'static str {
        "quickjs"
    }

    fn aliases(&self) -> &[&'static str] {
        &["javascript", "js"]
    }

    fn create(&self, cancel: &CancelToken) -> EngineResult<Box<dyn ScriptEngine>> {
        Ok(Box::new(QuickJsEngine::new(cancel.clone())?))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// A QuickJS runtime + context pair dedicated to one script execution.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
    cancel: CancelToken,
}

impl QuickJsEngine {
    /// Create a new engine whose execution aborts once `cancel` is triggered
    pub fn new(cancel: CancelToken) -> EngineResult<Self> {
        let runtime = Runtime::new().map_err(|e| EngineError::Creation(e.to_string()))?;

        // QuickJS polls this periodically while executing bytecode
        let interrupt = cancel.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || interrupt.is_cancelled())));

        let context =
            Context::full(&runtime).map_err(|e| EngineError::Creation(e.to_string()))?;

        Ok(Self {
            runtime,
            context,
            cancel,
        })
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }
}

impl ScriptEngine for QuickJsEngine {
    fn name(&self) -> &str {
        "quickjs"
    }

    fn evaluate(&mut self, source: &str, bindings: &Bindings) -> EngineResult<()> {
        let cancel = &self.cancel;
        self.context.with(|ctx| {
            install_bindings(&ctx, bindings)?;

            // Sloppy mode so `main = function (c) { ... }` creates a global
            let mut options = EvalOptions::default();
            options.global = true;
            options.strict = false;
            options.backtrace_barrier = true;

            ctx.eval_with_options::<(), _>(source, options)
                .map_err(|e| caught(&ctx, e, cancel))
        })
    }

    fn has_function(&self, name: &str) -> bool {
        self.context
            .with(|ctx| matches!(global_function(&ctx, name), Ok(Some(_))))
    }

    fn call_function(&mut self, name: &str, arg_binding: &str) -> EngineResult<()> {
        let cancel = &self.cancel;
        self.context.with(|ctx| {
            let func = global_function(&ctx, name)
                .map_err(|e| caught(&ctx, e, cancel))?
                .ok_or_else(|| EngineError::FunctionNotFound(name.to_string()))?;
            let arg: JsValue = ctx
                .globals()
                .get(arg_binding)
                .map_err(|e| caught(&ctx, e, cancel))?;

            func.call::<_, ()>((arg,))
                .map_err(|e| caught(&ctx, e, cancel))
        })
    }
}

/// Resolve `name` in global scope.
///
/// Goes through the evaluator rather than the global object so top-level
/// `const` and `let` declarations are found too.
fn global_function<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Option<Function<'js>>> {
    if !is_identifier(name) {
        return Ok(None);
    }

    let found = ctx.eval::<JsValue, _>(format!("typeof {name} === 'function' ? {name} : undefined"));
    match found {
        Ok(value) => Ok(value.into_function()),
        Err(rquickjs::Error::Exception) => {
            ctx.catch();
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ─────────────────────────────────────────────────────────────────────────────
// Bindings
// ─────────────────────────────────────────────────────────────────────────────

fn install_bindings(ctx: &Ctx<'_>, bindings: &Bindings) -> EngineResult<()> {
    let globals = ctx.globals();

    for (name, binding) in bindings.iter() {
        let installed = match binding {
            Binding::Value(value) => convert::json_to_js(ctx, value),
            Binding::Object(object) => host_object(ctx, object).map(Object::into_value),
        }
        .and_then(|value| globals.set(name, value));

        installed.map_err(|e| EngineError::Binding {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

/// Build a JS object whose methods forward to `object`
fn host_object<'js>(ctx: &Ctx<'js>, object: &Arc<dyn HostObject>) -> rquickjs::Result<Object<'js>> {
    let target = Object::new(ctx.clone())?;
    for &method in object.methods() {
        target.set(method, host_method(ctx, Arc::clone(object), method)?)?;
    }
    Ok(target)
}

fn host_method<'js>(
    ctx: &Ctx<'js>,
    object: Arc<dyn HostObject>,
    method: &'static str,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
            let args = args
                .0
                .iter()
                .map(convert::js_to_json)
                .collect::<rquickjs::Result<Vec<_>>>()?;

            match object.invoke(method, &args) {
                Ok(result) => convert::json_to_js(&ctx, &result),
                Err(message) => Err(Exception::throw_message(&ctx, &message)),
            }
        },
    )
}

/// Convert a failed QuickJS call into an [`EngineError`], clearing the
/// pending exception.
fn caught(ctx: &Ctx<'_>, error: rquickjs::Error, cancel: &CancelToken) -> EngineError {
    let thrown = matches!(error, rquickjs::Error::Exception).then(|| ctx.catch());

    if cancel.is_cancelled() {
        return EngineError::Interrupted;
    }

    match thrown {
        Some(thrown) => EngineError::Eval(convert::describe_thrown(&thrown)),
        None => EngineError::Eval(error.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl HostObject for Recorder {
        fn methods(&self) -> &[&'static str] {
            &["record", "fail"]
        }

        fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, String> {
            self.calls.lock().push((method.to_string(), args.to_vec()));
            match method {
                "fail" => Err("host refused".to_string()),
                _ => Ok(Value::Bool(true)),
            }
        }
    }

    impl Recorder {
        fn recorded(&self) -> Vec<Value> {
            self.calls
                .lock()
                .iter()
                .filter(|(method, _)| method == "record")
                .flat_map(|(_, args)| args.clone())
                .collect()
        }
    }

    fn engine_with(recorder: &Arc<Recorder>) -> (QuickJsEngine, Bindings) {
        let engine = QuickJsEngine::new(CancelToken::new()).unwrap();
        let mut bindings = Bindings::new();
        bindings.put_object("rec", recorder.clone());
        (engine, bindings)
    }

    #[test]
    fn test_evaluate_with_value_binding() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, mut bindings) = engine_with(&recorder);
        bindings.put_value("config", json!({ "factor": 2, "label": "x" }));

        engine
            .evaluate("rec.record(config.factor * 21, config.label);", &bindings)
            .unwrap();

        assert_eq!(recorder.recorded(), vec![json!(42), json!("x")]);
    }

    #[test]
    fn test_assigned_function_becomes_global() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        engine
            .evaluate("main = function (c) { c.record('hi'); };", &bindings)
            .unwrap();

        assert!(engine.has_function("main"));
        assert!(!engine.has_function("handler"));

        engine.call_function("main", "rec").unwrap();
        assert_eq!(recorder.recorded(), vec![json!("hi")]);
    }

    #[test]
    fn test_lexical_declarations_are_found() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        engine
            .evaluate(
                r#"
                const main = (c) => { c.record('const'); };
                let handler = function (c) { c.record('let'); };
                const notAFunction = 3;
                "#,
                &bindings,
            )
            .unwrap();

        assert!(engine.has_function("main"));
        assert!(engine.has_function("handler"));
        assert!(!engine.has_function("notAFunction"));
        assert!(!engine.has_function("missing"));
        assert!(!engine.has_function("main; rec.record('injected')"));

        engine.call_function("main", "rec").unwrap();
        engine.call_function("handler", "rec").unwrap();
        assert_eq!(recorder.recorded(), vec![json!("const"), json!("let")]);
    }

    #[test]
    fn test_cyclic_argument_is_marked() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        engine
            .evaluate(
                "var o = { name: 'o', list: [] }; o.self = o; o.list.push(o); rec.record(o);",
                &bindings,
            )
            .unwrap();

        assert_eq!(
            recorder.recorded(),
            vec![json!({ "name": "o", "list": ["[Circular]"], "self": "[Circular]" })]
        );
    }

    #[test]
    fn test_shared_reference_is_not_circular() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        engine
            .evaluate("var leaf = { v: 1 }; rec.record([leaf, leaf]);", &bindings)
            .unwrap();

        assert_eq!(recorder.recorded(), vec![json!([{ "v": 1 }, { "v": 1 }])]);
    }

    #[test]
    fn test_deep_nesting_throws() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        let err = engine
            .evaluate(
                "var deep = {}; for (var i = 0; i < 1000; i++) { deep = { next: deep }; } rec.record(deep);",
                &bindings,
            )
            .unwrap_err();

        match err {
            EngineError::Eval(message) => assert!(message.starts_with("RangeError"), "{message}"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(recorder.recorded().is_empty());
    }

    #[test]
    fn test_non_finite_numbers() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        engine
            .evaluate("rec.record(Infinity, -Infinity, NaN, 1.5);", &bindings)
            .unwrap();

        assert_eq!(
            recorder.recorded(),
            vec![json!("Infinity"), json!("-Infinity"), json!("NaN"), json!(1.5)]
        );
    }

    #[test]
    fn test_thrown_error_is_described() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        let err = engine
            .evaluate("throw new TypeError('boom');", &bindings)
            .unwrap_err();

        match err {
            EngineError::Eval(message) => assert_eq!(message, "TypeError: boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_thrown_string_is_described() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        let err = engine.evaluate("throw 'plain';", &bindings).unwrap_err();
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn test_host_error_is_catchable() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);

        engine
            .evaluate(
                r#"
                try {
                    rec.fail();
                } catch (e) {
                    rec.record(e.message);
                }
                "#,
                &bindings,
            )
            .unwrap();

        assert_eq!(recorder.recorded(), vec![json!("host refused")]);
    }

    #[test]
    fn test_missing_function() {
        let recorder = Arc::new(Recorder::default());
        let (mut engine, bindings) = engine_with(&recorder);
        engine.evaluate("var x = 1;", &bindings).unwrap();

        let err = engine.call_function("main", "rec").unwrap_err();
        assert!(matches!(err, EngineError::FunctionNotFound(name) if name == "main"));
    }

    #[test]
    fn test_cancel_interrupts_busy_loop() {
        let cancel = CancelToken::new();
        let mut engine = QuickJsEngine::new(cancel.clone()).unwrap();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        let started = Instant::now();
        let err = engine
            .evaluate("while (true) {}", &Bindings::new())
            .unwrap_err();
        stopper.join().unwrap();

        assert!(err.is_interrupted());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_engines_do_not_share_globals() {
        let recorder = Arc::new(Recorder::default());
        let (mut first, bindings) = engine_with(&recorder);
        first.evaluate("function init(c) {}", &bindings).unwrap();

        let (second, _) = engine_with(&recorder);
        assert!(first.has_function("init"));
        assert!(!second.has_function("init"));
        first.gc();
    }
}
