use earnwatch_adapters::parse_earnings_page;
use earnwatch_core::normalize_tokens;

fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/yahoo")
        .join(name);
    std::fs::read_to_string(&path).expect("read fixture")
}

#[test]
fn yahoo_calendar_fixture_parses_into_utc_instants() {
    let page = parse_earnings_page(&fixture("earnings_calendar.html")).expect("parse");
    assert_eq!(page.company_name, "Apple Inc.");
    assert_eq!(page.date_tokens.len(), 4);

    let batch = normalize_tokens(&page.date_tokens);
    assert!(batch.failures.is_empty(), "{:?}", batch.failures);
    assert_eq!(batch.ignored, 1);

    let rendered = batch
        .instants
        .iter()
        .map(|i| i.to_rfc3339())
        .collect::<Vec<_>>();
    assert_eq!(
        rendered,
        vec![
            "2024-02-01T21:00:00+00:00",
            "2024-08-01T20:00:00+00:00",
            "2024-10-31T20:00:00+00:00",
        ]
    );
}
