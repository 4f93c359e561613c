//! Offset pagination with totals.

mod common;

use common::{Customer, Fixture, Invoice};
use entgraph::predicate as p;
use entgraph::Page;

fn invoices(count: i64) -> Fixture {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    for i in 1..=count {
        fx.invoice(&acme, &format!("INV-{i:03}"), i * 100);
    }
    fx.reset();
    fx
}

#[test]
fn test_total_is_the_same_for_every_page() {
    let fx = invoices(23);
    let mut seen = Vec::new();
    for number in 1..=3 {
        let page = fx
            .client
            .query::<Invoice>()
            .order_asc("number")
            .paginate(&fx.ctx, Page::number(number, 10))
            .unwrap();
        assert_eq!(page.total_count, 23);
        assert_eq!(page.has_next(), number < 3);
        seen.extend(page.items.into_iter().map(|i| i.number));
    }
    assert_eq!(seen.len(), 23);
    assert_eq!(seen.first().map(String::as_str), Some("INV-001"));
    assert_eq!(seen.last().map(String::as_str), Some("INV-023"));
}

#[test]
fn test_zero_page_returns_everything() {
    let fx = invoices(7);
    let all = fx
        .client
        .entity::<Invoice>()
        .paginate(&fx.ctx, Page::ALL)
        .unwrap();
    assert_eq!(all.total_count, 7);
    assert_eq!(all.items.len(), 7);
    assert_eq!(all.page, Page::new(7, 0));

    // The offset means nothing without a limit.
    let all = fx
        .client
        .query::<Invoice>()
        .paginate(&fx.ctx, Page::new(0, 5))
        .unwrap();
    assert_eq!(all.items.len(), 7);
}

#[test]
fn test_zero_page_equals_concatenated_windows() {
    let fx = invoices(11);
    let ordered = || fx.client.query::<Invoice>().order_desc("amount_cents");

    let all: Vec<i64> = ordered()
        .paginate(&fx.ctx, Page::ALL)
        .unwrap()
        .items
        .into_iter()
        .map(|i| i.id)
        .collect();

    let mut windows = Vec::new();
    let mut number = 1;
    loop {
        let page = ordered().paginate(&fx.ctx, Page::number(number, 4)).unwrap();
        windows.extend(page.items.iter().map(|i| i.id));
        if !page.has_next() {
            break;
        }
        number += 1;
    }
    assert_eq!(number, 3);
    assert_eq!(all.len(), 11);
    assert_eq!(all, windows);
}

#[test]
fn test_total_ignores_existing_window_and_ordering() {
    let fx = invoices(12);
    let page = fx
        .client
        .query::<Invoice>()
        .filter(p::gt("amount_cents", 500))
        .order_desc("amount_cents")
        .limit(2)
        .offset(1)
        .paginate(&fx.ctx, Page::new(4, 0))
        .unwrap();
    assert_eq!(page.total_count, 7);
    let amounts: Vec<i64> = page.items.iter().map(|i| i.amount_cents).collect();
    assert_eq!(amounts, vec![1200, 1100, 1000, 900]);

    let sql = fx.recorder.sql();
    assert_eq!(sql.len(), 2);
    assert!(!sql[0].contains("ORDER BY"), "{}", sql[0]);
    assert!(sql[1].contains("ORDER BY"), "{}", sql[1]);
}

#[test]
fn test_count_does_not_eager_load() {
    let fx = invoices(3);
    let page = fx
        .client
        .query::<Customer>()
        .with_edge::<Invoice>("invoices")
        .paginate(&fx.ctx, Page::new(10, 0))
        .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.items[0].invoices().unwrap().len(), 3);
    // count + customers + invoices
    assert_eq!(fx.queries(), 3);
}

#[test]
fn test_empty_result() {
    let fx = Fixture::new();
    let page = fx
        .client
        .query::<Invoice>()
        .paginate(&fx.ctx, Page::new(10, 0))
        .unwrap();
    assert_eq!(page.total_count, 0);
    assert!(page.items.is_empty());
    assert!(!page.has_next());

    let all = fx.client.query::<Invoice>().paginate(&fx.ctx, Page::ALL).unwrap();
    assert!(all.items.is_empty());
    assert_eq!(fx.queries(), 3);
}
