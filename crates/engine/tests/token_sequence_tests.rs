//! Instance indices come from a process-wide counter, so the literal tokens
//! below only hold while this is the sole test in its binary.

use deferred_engine::{EngineOptions, Helper, HelperEngine, Value, WrapOptions};

fn upper() -> Helper {
    Helper::sync(|args| {
        let text = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(Value::from(text.to_uppercase()))
    })
}

#[tokio::test]
async fn tokens_follow_instance_and_invocation_order() {
    let first = HelperEngine::with_defaults();
    first.set("upper", upper());
    let wrapped = first.get("upper", WrapOptions::wrapped()).expect("wrapped upper");

    let id = wrapped.call(vec!["doowb".into()]).expect("token");
    assert_eq!(id, Value::from("{$ASYNCID$0$0$}"));
    assert_eq!(first.resolve_id("{$ASYNCID$0$0$}").await, Ok(Value::from("DOOWB")));

    let second = HelperEngine::new(EngineOptions::with_prefix("{$custom$prefix$$")).expect("custom engine");
    second.set("upper", upper());
    let custom = second.get("upper", WrapOptions::wrapped()).expect("wrapped upper");
    assert_eq!(custom.call(vec!["doowb".into()]).expect("token"), Value::from("{$custom$prefix$$1$0$}"));
    assert_eq!(custom.call(vec!["jonschlinkert".into()]).expect("token"), Value::from("{$custom$prefix$$1$1$}"));

    // Each engine only recognizes its own prefix.
    assert!(!first.matches("{$custom$prefix$$1$0$}"));
    assert!(second.matches("{$custom$prefix$$1$0$}"));
    assert_eq!(second.resolve_id("{$custom$prefix$$1$1$}").await, Ok(Value::from("JONSCHLINKERT")));
}
