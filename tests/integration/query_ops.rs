//! Query builder behavior against SQLite: predicates, ordering, paging,
//! single-row terminals, traversals, projections and context handling.

mod common;

use std::time::Duration;

use common::{Customer, Fixture, Invoice, Plan};
use entgraph::predicate as p;
use entgraph::query::Aggregate;
use entgraph::{Context, Error, Value};

fn seeded() -> Fixture {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    let globex = fx.customer("Globex", "ap@globex.test");
    let _initech = fx.customer("Initech", "finance@initech.test");
    fx.invoice(&acme, "INV-1", 1200);
    fx.invoice(&acme, "INV-2", 0);
    fx.invoice(&globex, "INV-3", 5400);
    fx.client
        .entity::<Customer>()
        .update()
        .filter(p::eq("name", "Globex"))
        .set("tier", "gold")
        .save(&fx.ctx)
        .unwrap();
    fx.reset();
    fx
}

fn names(customers: &[Customer]) -> Vec<&str> {
    customers.iter().map(|c| c.name.as_str()).collect()
}

#[test]
fn test_predicate_order_does_not_matter() {
    let fx = seeded();
    let customers = fx.client.entity::<Customer>();

    let forward = customers
        .query()
        .filter(p::eq("tier", "free"))
        .filter(p::has_prefix("email", "billing"))
        .ids(&fx.ctx)
        .unwrap();
    let backward = customers
        .query()
        .filter(p::has_prefix("email", "billing"))
        .filter(p::eq("tier", "free"))
        .ids(&fx.ctx)
        .unwrap();
    let combined = customers
        .query()
        .filter(p::and(vec![
            p::has_prefix("email", "billing"),
            p::eq("tier", "free"),
        ]))
        .ids(&fx.ctx)
        .unwrap();

    assert_eq!(forward, vec![Value::Int(1)]);
    assert_eq!(forward, backward);
    assert_eq!(forward, combined);
}

#[test]
fn test_or_not_and_in() {
    let fx = seeded();
    let customers = fx.client.entity::<Customer>();

    let either = customers
        .query()
        .filter(p::or(vec![p::eq("name", "Acme"), p::eq("tier", "gold")]))
        .order_asc("name")
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(names(&either), vec!["Acme", "Globex"]);

    let neither = customers
        .query()
        .filter(p::not(p::is_in("name", ["Acme", "Globex"])))
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(names(&neither), vec!["Initech"]);

    let matched = customers
        .query()
        .filter(p::contains("email", "globex"))
        .only(&fx.ctx)
        .unwrap();
    assert_eq!(matched.name, "Globex");
}

#[test]
fn test_like_patterns_are_escaped() {
    let fx = seeded();
    let found = fx
        .client
        .query::<Customer>()
        .filter(p::contains("email", "%"))
        .count(&fx.ctx)
        .unwrap();
    assert_eq!(found, 0);
}

#[test]
fn test_nullable_predicates() {
    let fx = seeded();
    fx.client
        .entity::<Customer>()
        .update()
        .filter(p::eq("name", "Initech"))
        .set("note", "net-60 terms")
        .save(&fx.ctx)
        .unwrap();

    let noted = fx.client.query::<Customer>().filter(p::not_null("note")).only(&fx.ctx).unwrap();
    assert_eq!(noted.note.as_deref(), Some("net-60 terms"));
    let plain = fx.client.query::<Customer>().filter(p::is_null("note")).count(&fx.ctx).unwrap();
    assert_eq!(plain, 2);
}

#[test]
fn test_only_semantics() {
    let fx = seeded();
    let invoices = fx.client.entity::<Invoice>();

    let big = invoices.query().filter(p::gt("amount_cents", 5000)).only(&fx.ctx).unwrap();
    assert_eq!(big.number, "INV-3");

    let err = invoices.query().filter(p::lt("amount_cents", 5000)).only(&fx.ctx).unwrap_err();
    assert!(err.is_not_singular());
    assert_eq!(err.to_string(), "entgraph: invoice not singular");

    let err = invoices.query().filter(p::gt("amount_cents", 10_000)).only(&fx.ctx).unwrap_err();
    assert!(err.is_not_found());

    assert!(invoices.query().filter(p::eq("number", "INV-9")).first(&fx.ctx).unwrap_err().is_not_found());
    assert!(!invoices.query().filter(p::eq("number", "INV-9")).exist(&fx.ctx).unwrap());
}

#[test]
fn test_get_by_id() {
    let fx = seeded();
    let customers = fx.client.entity::<Customer>();
    assert_eq!(customers.get(&fx.ctx, 2).unwrap().name, "Globex");
    assert!(customers.get(&fx.ctx, 42).unwrap_err().is_not_found());
}

#[test]
fn test_ordering_limit_offset() {
    let fx = seeded();
    let page = fx
        .client
        .query::<Invoice>()
        .order_desc("amount_cents")
        .limit(2)
        .offset(1)
        .all(&fx.ctx)
        .unwrap();
    let numbers: Vec<&str> = page.iter().map(|i| i.number.as_str()).collect();
    assert_eq!(numbers, vec!["INV-1", "INV-2"]);
}

#[test]
fn test_offset_without_limit_emits_max_limit() {
    let fx = seeded();
    let rest = fx
        .client
        .query::<Customer>()
        .order_asc("id")
        .offset(2)
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(names(&rest), vec!["Initech"]);

    let statements = fx.recorder.statements();
    let last = statements.last().unwrap();
    assert!(last.sql.contains("LIMIT ? OFFSET ?"), "{}", last.sql);
    assert!(last.values.contains(&Value::Int(i64::MAX)));
}

#[test]
fn test_has_edge_predicates() {
    let fx = seeded();
    let customers = fx.client.entity::<Customer>();

    let billed = customers
        .query()
        .filter(p::has_edge("invoices"))
        .order_asc("id")
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(names(&billed), vec!["Acme", "Globex"]);

    let large = customers
        .query()
        .filter(p::has_edge_with::<Customer, Invoice>(
            "invoices",
            vec![p::gte("amount_cents", 5000)],
        ))
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(names(&large), vec!["Globex"]);

    let err = customers
        .query()
        .filter(p::has_edge("payments"))
        .all(&fx.ctx)
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_query_edge_traversal() {
    let fx = seeded();
    let acme = fx.client.entity::<Customer>().get(&fx.ctx, 1).unwrap();
    fx.reset();

    let invoices = fx
        .client
        .entity::<Customer>()
        .query_edge::<Invoice>(&acme, "invoices")
        .order_asc("number")
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(invoices.len(), 2);
    assert!(invoices.iter().all(|i| i.customer_id == acme.id));

    let owners = fx
        .client
        .query::<Invoice>()
        .filter(p::gt("amount_cents", 1000))
        .query_edge::<Customer>("customer")
        .order_asc("name")
        .all(&fx.ctx)
        .unwrap();
    assert_eq!(names(&owners), vec!["Acme", "Globex"]);
    assert_eq!(fx.queries(), 2);
}

#[test]
fn test_unknown_field_fails_without_querying() {
    let fx = seeded();
    let err = fx
        .client
        .query::<Customer>()
        .filter(p::eq("nickname", "acme"))
        .all(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "nickname"));
    assert_eq!(fx.queries(), 0);
}

#[test]
fn test_projection_and_aggregates() {
    let fx = seeded();

    let emails: Vec<String> = fx
        .client
        .query::<Customer>()
        .order_asc("email")
        .select(&["email"])
        .values(&fx.ctx)
        .unwrap();
    assert_eq!(
        emails,
        vec!["ap@globex.test", "billing@acme.test", "finance@initech.test"]
    );

    let billed: i64 = fx
        .client
        .query::<Invoice>()
        .aggregate(Aggregate::sum("amount_cents"))
        .value(&fx.ctx)
        .unwrap();
    assert_eq!(billed, 6600);

    let per_customer = fx
        .client
        .query::<Invoice>()
        .order_asc("customer_id")
        .group_by(&["customer_id"])
        .aggregate(Aggregate::count().alias("invoices"))
        .maps(&fx.ctx)
        .unwrap();
    assert_eq!(per_customer.len(), 2);
    assert_eq!(per_customer[0]["customer_id"], Value::Int(1));
    assert_eq!(per_customer[0]["invoices"], Value::Int(2));

    let err = fx
        .client
        .query::<Invoice>()
        .select(&["total"])
        .rows(&fx.ctx)
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_count_ignores_ordering() {
    let fx = seeded();
    let count = fx
        .client
        .query::<Invoice>()
        .order_desc("amount_cents")
        .count(&fx.ctx)
        .unwrap();
    assert_eq!(count, 3);
    let sql = fx.recorder.sql();
    assert!(!sql.last().unwrap().contains("ORDER BY"), "{sql:?}");
}

#[test]
fn test_cancelled_context_is_not_not_found() {
    let fx = seeded();
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();

    let err = fx.client.query::<Plan>().first(&ctx).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(!err.is_not_found());
    assert_eq!(fx.queries(), 0);

    let err = fx.client.query::<Plan>().exist(&ctx).unwrap_err();
    assert!(err.is_context());
}

#[test]
fn test_expired_deadline() {
    let fx = seeded();
    let ctx = Context::background().with_timeout(Duration::ZERO);
    std::thread::sleep(Duration::from_millis(2));
    let err = fx.client.query::<Customer>().all(&ctx).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}
