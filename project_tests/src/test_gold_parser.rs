//! # Gold Table Parser Fixture Tests
//!
//! Runs the default parser over a captured copy of the price page and checks
//! the normalised records, including the rows it must drop.

use lib_common::markets::gold::{parse, FeedUpdate, PriceStatus};

const SAMPLE_PAGE: &str = include_str!("../fixtures/kapalicarsi_sample.html");

#[test]
fn fixture_yields_three_records_in_document_order() {
    let records = parse(SAMPLE_PAGE);
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Gram Altın", "Çeyrek Altın", "Ons"]);
}

#[test]
fn fixture_fields_are_normalised() {
    let records = parse(SAMPLE_PAGE);

    let gram = &records[0];
    assert_eq!(gram.buying, "3.010,10");
    assert_eq!(gram.selling, "3.012,45");
    assert_eq!(gram.status, PriceStatus::Up);
    assert_eq!(gram.change_rate, "%0,42");
    assert_eq!(gram.change_amount, "12,60");
    assert_eq!(gram.time, "14:32");

    let quarter = &records[1];
    assert_eq!(quarter.status, PriceStatus::Down);
    assert_eq!(quarter.change_amount, "-9,00");
    assert_eq!(quarter.time, "14:31");

    let ounce = &records[2];
    assert_eq!(ounce.status, PriceStatus::Neutral);
    assert_eq!(ounce.change_rate, "");
    assert_eq!(ounce.change_amount, "");
}

#[test]
fn update_message_has_the_wire_shape() {
    let update = FeedUpdate::gold(parse(SAMPLE_PAGE));
    let json = serde_json::to_value(&update).unwrap();

    assert_eq!(json["type"], "gold-update");
    let first = &json["data"][0];
    for key in ["name", "buying", "selling", "changeRate", "changeAmount", "status", "time"] {
        assert!(first.get(key).is_some(), "missing key {}", key);
    }
    assert_eq!(first["status"], "up");
}

#[test]
fn unrelated_markup_yields_nothing() {
    assert!(parse("").is_empty());
    assert!(parse("<html><body><p>bakımdayız</p></body></html>").is_empty());
    assert!(parse("<table id=\"kapalicarsi_h\"><tr><td>unterminated").is_empty());
}
