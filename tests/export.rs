use serde_json::json;
use tresor::categories::bucket_costs;
use tresor::domain::{Granularity, MonetaryEvent, PriceObservation};
use tresor::export::{write_category_costs, write_prices, write_timeline, write_transactions};
use tresor::timeline::aggregate;

fn events() -> Vec<MonetaryEvent> {
    serde_json::from_value(json!([
        { "date": "2024-07-01", "month": "2024-07", "direction": "in", "amount": 100, "category": "Ventes", "label": "VIR \"ACME\", Paris" },
        { "date": "2024-07-02", "direction": "out", "amount": "40.5", "category": "Charges fixes" }
    ]))
    .expect("events")
}

fn render(write: impl FnOnce(&mut Vec<u8>)) -> String {
    let mut buf = Vec::new();
    write(&mut buf);
    String::from_utf8(buf).expect("utf8")
}

#[test]
fn transactions_quote_every_field_and_double_embedded_quotes() {
    let out = render(|buf| write_transactions(buf, &events()).expect("csv"));
    let lines: Vec<&str> = out.lines().collect();

    assert_eq!(lines[0], r#""date","month","direction","amount","category","label""#);
    assert_eq!(
        lines[1],
        r#""2024-07-01","2024-07","in","100","Ventes","VIR ""ACME"", Paris""#
    );
    assert_eq!(lines[2], r#""2024-07-02","","out","40.5","Charges fixes","""#);
    assert_eq!(lines.len(), 3);
}

#[test]
fn prices_export_keeps_input_order_and_flags() {
    let observations: Vec<PriceObservation> = serde_json::from_value(json!([
        { "productId": 7, "code": "EAN-1", "name": "Huile", "supplier": "Sud", "purchasePrice": 3.2, "quantity": 12, "invoiceDate": "2024-02-01", "marginAlert": true, "stockoutEvents": 2 },
        { "name": "Sel", "invoiceDate": "2024-01-01" }
    ]))
    .expect("prices");
    let out = render(|buf| write_prices(buf, &observations).expect("csv"));
    let lines: Vec<&str> = out.lines().collect();

    assert!(lines[0].starts_with(r#""invoice_date","product_id","code""#));
    assert_eq!(
        lines[1],
        r#""2024-02-01","7","EAN-1","Huile","Sud","3.2","12","","true","false","false","2""#
    );
    assert_eq!(
        lines[2],
        r#""2024-01-01","","","Sel","","","","","false","false","false","0""#
    );
}

#[test]
fn timeline_export_has_two_decimals() {
    let timeline = aggregate(&events(), Granularity::Weekly);
    let out = render(|buf| write_timeline(buf, &timeline).expect("csv"));
    let lines: Vec<&str> = out.lines().collect();

    assert_eq!(lines[0], r#""key","period_start","period_end","inflow","outflow","net""#);
    assert_eq!(
        lines[1],
        r#""2024-W27","2024-07-01","2024-07-07","100.00","40.50","59.50""#
    );
}

#[test]
fn category_costs_export_one_row_per_category() {
    let costs = bucket_costs(&events(), Granularity::Monthly);
    let out = render(|buf| write_category_costs(buf, &costs).expect("csv"));

    assert_eq!(
        out,
        "\"key\",\"period_start\",\"category\",\"cost\"\n\"2024-07\",\"2024-07-01\",\"Charges fixes\",\"40.50\"\n"
    );
}
