//! Quoting of names that end up in DDL

use replguard_rdbc::dialect::{quote_ident, quote_qualified};
use replguard_rdbc::security::validate_sql_identifier;

#[test]
fn test_quote_keeps_case_and_spaces() {
    assert_eq!(quote_ident("Orders"), "\"Orders\"");
    assert_eq!(quote_ident("order items"), "\"order items\"");
    assert_eq!(quote_ident("bucardo_kick_app_sync"), "\"bucardo_kick_app_sync\"");
}

#[test]
fn test_qualified_name() {
    assert_eq!(quote_qualified("sales", "Orders"), "\"sales\".\"Orders\"");
}

#[test]
fn test_injection_stays_inside_identifier() {
    let quoted = quote_qualified("public", "t\"; DROP TABLE x; --");
    assert_eq!(quoted, "\"public\".\"t\"\"; DROP TABLE x; --\"");
}

#[test]
fn test_replication_name_needs_no_quoting() {
    // Names that pass validation are emitted unchanged inside the quotes
    let name = "nightly_sync";
    validate_sql_identifier(name).unwrap();
    assert_eq!(quote_ident(name), format!("\"{name}\""));

    assert!(validate_sql_identifier("sync; rm -rf /").is_err());
}
