//! Console API
//!
//! Implements console.log, console.warn, console.error, etc. Messages go to
//! the log and to the view as [`ViewEvent::ConsoleMessage`].

use std::rc::Rc;

use rquickjs::convert::{Coerced, FromJs};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use vela_view::{ConsoleLevel, NativeHandle, ViewEvent};

use crate::bindings::Shared;
use crate::text;

const METHODS: [(&str, ConsoleLevel); 5] = [
    ("log", ConsoleLevel::Log),
    ("info", ConsoleLevel::Info),
    ("warn", ConsoleLevel::Warning),
    ("error", ConsoleLevel::Error),
    ("debug", ConsoleLevel::Debug),
];

/// Install console API into the global object
pub(crate) fn install_console<'js>(ctx: &Ctx<'js>, shared: Rc<Shared>, view: NativeHandle) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let console = Object::new(ctx.clone())?;

    for (name, level) in METHODS {
        let shared = shared.clone();
        console.set(
            name,
            Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
                let message = join(&args.0);
                log_with_level(level, &message);
                shared.sink.post_event(
                    view,
                    ViewEvent::ConsoleMessage {
                        level,
                        message,
                        source_id: String::new(),
                        line: 0,
                        column: 0,
                    },
                );
                Ok::<(), rquickjs::Error>(())
            })?,
        )?;
    }

    globals.set("console", console)?;

    Ok(())
}

fn join(values: &[Value<'_>]) -> String {
    values.iter().map(describe).collect::<Vec<_>>().join(" ")
}

fn log_with_level(level: ConsoleLevel, message: &str) {
    match level {
        ConsoleLevel::Error => tracing::error!("[JS] {}", message),
        ConsoleLevel::Warning => tracing::warn!("[JS] {}", message),
        ConsoleLevel::Debug => tracing::debug!("[JS] {}", message),
        ConsoleLevel::Log | ConsoleLevel::Info => tracing::info!("[JS] {}", message),
    }
}

/// Display text of a JS value: its JS `ToString`, except that functions are
/// tagged by name and anything whose conversion throws is tagged by type.
pub(crate) fn describe(value: &Value<'_>) -> String {
    if let Some(function) = value.as_function() {
        let name: Option<String> = function.get("name").ok().flatten();
        return match name {
            Some(name) if !name.is_empty() => format!("[function {}]", name),
            _ => "[function]".to_string(),
        };
    }
    let ctx = value.ctx();
    let text = Coerced::<rquickjs::String>::from_js(ctx, value.clone())
        .and_then(|Coerced(text)| text::string_bytes(ctx, &text));
    match text {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            tracing::trace!("ToString of a {} failed: {}", value.type_name(), err);
            format!("[{}]", value.type_name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn described(script: &str) -> String {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let value: Value = ctx.eval(script).unwrap();
            describe(&value)
        })
    }

    #[test]
    fn test_describe_follows_js_to_string() {
        assert_eq!(described("42"), "42");
        assert_eq!(described("1.5"), "1.5");
        assert_eq!(described("0/0"), "NaN");
        assert_eq!(described("undefined"), "undefined");
        assert_eq!(described("null"), "null");
        assert_eq!(described("[1, 'a']"), "1,a");
        assert_eq!(described("({})"), "[object Object]");
        assert_eq!(described("new Error('bad')"), "Error: bad");
    }

    #[test]
    fn test_describe_tags_functions() {
        assert_eq!(described("(function tick() {})"), "[function tick]");
        assert_eq!(described("(() => 1)"), "[function]");
    }

    #[test]
    fn test_describe_keeps_text_around_lone_surrogate() {
        assert_eq!(described("'a\\uD800b'"), "a\u{FFFD}\u{FFFD}\u{FFFD}b");
    }

    #[test]
    fn test_describe_survives_throwing_to_string() {
        assert_eq!(described("({ toString() { throw 1 } })"), "[object]");
    }
}
