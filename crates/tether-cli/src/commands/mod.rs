//! CLI command implementations.

mod eval;
mod run;

pub use eval::EvalCommand;
pub use run::RunCommand;

use serde_json::Value;
use tether_runtime::{Definer, TetherResult, Variadic};

/// Define `print(...args)`: strings are written as-is, everything else as JSON.
pub fn define_print<D: Definer>(target: &D) -> TetherResult<()> {
    target.define_function("print", |args: Variadic<Value>| {
        println!("{}", format_print(&args));
    })
}

fn format_print(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_print() {
        assert_eq!(format_print(&[]), "");
        assert_eq!(
            format_print(&[json!("total:"), json!(3), json!({"a": [true]})]),
            r#"total: 3 {"a":[true]}"#
        );
    }
}
