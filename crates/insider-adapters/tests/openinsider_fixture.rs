use std::path::Path;

use insider_adapters::parse_screener_html;

#[test]
fn screener_fixture_is_newest_first() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let html = std::fs::read_to_string(root.join("fixtures/openinsider/screener.html"))
        .expect("screener fixture present");

    let trades = parse_screener_html(&html).expect("fixture parses");
    assert!(!trades.is_empty());
    assert!(trades
        .windows(2)
        .all(|pair| pair[0].filing_date >= pair[1].filing_date));
    assert!(trades
        .iter()
        .all(|t| !t.ticker.is_empty() && !t.filing_date.is_empty()));
}
