//! Row and value decoding as the catalog queries use it

use replguard_rdbc::error::ErrorCategory;
use replguard_rdbc::types::{Row, Value};

#[test]
fn test_counts_decode_from_any_integer_width() {
    assert_eq!(Value::Int32(-3).as_i64(), Some(-3));
    assert_eq!(Value::Int64(10_000_000_000).as_i64(), Some(10_000_000_000));
    assert_eq!(Value::from("12").as_i64(), Some(12));
    assert_eq!(Value::from("twelve").as_i64(), None);
    assert_eq!(Value::Null.as_i64(), None);
}

#[test]
fn test_bool_text_forms() {
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert_eq!(Value::from("f").as_bool(), Some(false));
    assert_eq!(Value::from("yes").as_bool(), None);
    assert_eq!(Value::Int32(1).as_bool(), None);
}

#[test]
fn test_optional_values_bind_as_null() {
    assert!(Value::from(Option::<String>::None).is_null());
    assert_eq!(Value::from(Some("orders")), Value::from("orders"));
}

#[test]
fn test_row_lookup() {
    let row = Row::new(
        vec!["nspname".into(), "relname".into(), "n".into()],
        vec![Value::from("public"), Value::from("orders"), Value::Int64(3)],
    );

    assert_eq!(row.len(), 3);
    assert_eq!(row.get(1), Some(&Value::from("orders")));
    assert_eq!(row.require_str("RELNAME").unwrap(), "orders");
    assert_eq!(row.require_i64("n").unwrap(), 3);
}

#[test]
fn test_row_shape_errors() {
    let row = Row::from_pairs([("relname", "orders")]);

    let wrong_type = row.require_i64("relname").unwrap_err();
    assert_eq!(wrong_type.category(), ErrorCategory::Decode);

    let missing = row.require_str("nspname").unwrap_err();
    assert!(missing.to_string().contains("nspname"));
    assert!(!missing.is_recoverable());
}
