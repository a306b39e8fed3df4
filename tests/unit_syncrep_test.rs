use steward::core::postgres::syncrep::{format_synchronous_standby_names, quote_ident};

#[test]
fn test_empty_list_disables_sync_rep() {
    assert_eq!(format_synchronous_standby_names(1, &[]), "");
}

#[test]
fn test_single_standby() {
    let names = vec!["steward_2".to_string()];
    assert_eq!(
        format_synchronous_standby_names(1, &names),
        "ANY 1 (\"steward_2\")"
    );
}

#[test]
fn test_multiple_standbys_keep_order() {
    let names = vec!["steward_2".to_string(), "steward_3".to_string()];
    assert_eq!(
        format_synchronous_standby_names(2, &names),
        "ANY 2 (\"steward_2\", \"steward_3\")"
    );
}

#[test]
fn test_number_sync_standbys_is_at_least_one() {
    let names = vec!["steward_2".to_string()];
    assert_eq!(
        format_synchronous_standby_names(0, &names),
        "ANY 1 (\"steward_2\")"
    );
}

#[test]
fn test_quote_ident_escapes_quotes() {
    assert_eq!(quote_ident("plain"), "\"plain\"");
    assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
}
