//! Transactions: commit, rollback, closed handles and internal atomicity.

mod common;

use common::{Customer, Feature, Fixture, Invoice, Plan};
use entgraph::predicate as p;
use entgraph::{Error, Result};

#[test]
fn test_commit_persists() {
    let fx = Fixture::new();
    let tx = fx.client.tx(&fx.ctx).unwrap();
    assert!(tx.in_tx());
    let acme = tx
        .entity::<Customer>()
        .create()
        .set("name", "Acme")
        .set("email", "billing@acme.test")
        .save(&fx.ctx)
        .unwrap();
    tx.entity::<Invoice>()
        .create()
        .set("number", "INV-1")
        .set("amount_cents", 100)
        .set_edge_id("customer", acme.id)
        .exec(&fx.ctx)
        .unwrap();
    tx.commit().unwrap();

    assert!(!fx.client.in_tx());
    assert_eq!(fx.client.query::<Invoice>().count(&fx.ctx).unwrap(), 1);
}

#[test]
fn test_rollback_discards() {
    let fx = Fixture::new();
    let tx = fx.client.tx(&fx.ctx).unwrap();
    tx.entity::<Customer>()
        .create()
        .set("name", "Acme")
        .set("email", "billing@acme.test")
        .exec(&fx.ctx)
        .unwrap();
    tx.rollback().unwrap();
    assert_eq!(fx.client.query::<Customer>().count(&fx.ctx).unwrap(), 0);
}

#[test]
fn test_closed_transaction_refuses_work() {
    let fx = Fixture::new();
    let tx = fx.client.tx(&fx.ctx).unwrap();
    let bound = tx.client().clone();
    tx.commit().unwrap();

    let err = bound.query::<Customer>().all(&fx.ctx).unwrap_err();
    assert!(matches!(err, Error::TxClosed));
    let err = bound
        .entity::<Customer>()
        .create()
        .set("name", "Late")
        .set("email", "late@example.test")
        .exec(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::TxClosed));
}

#[test]
fn test_nested_transaction_is_rejected() {
    let fx = Fixture::new();
    let tx = fx.client.tx(&fx.ctx).unwrap();
    assert!(tx.tx(&fx.ctx).is_err());
    tx.rollback().unwrap();
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let fx = Fixture::new();
    {
        let tx = fx.client.tx(&fx.ctx).unwrap();
        tx.entity::<Customer>()
            .create()
            .set("name", "Acme")
            .set("email", "billing@acme.test")
            .exec(&fx.ctx)
            .unwrap();
    }
    assert_eq!(fx.client.query::<Customer>().count(&fx.ctx).unwrap(), 0);
}

#[test]
fn test_with_tx() {
    let fx = Fixture::new();
    let id = fx
        .client
        .with_tx(&fx.ctx, |tx| {
            let acme = tx
                .entity::<Customer>()
                .create()
                .set("name", "Acme")
                .set("email", "billing@acme.test")
                .save(&fx.ctx)?;
            Ok(acme.id)
        })
        .unwrap();
    assert!(fx.client.entity::<Customer>().get(&fx.ctx, id).is_ok());

    let result: Result<()> = fx.client.with_tx(&fx.ctx, |tx| {
        tx.entity::<Customer>()
            .update_one_id(id)
            .set("tier", "gold")
            .exec(&fx.ctx)?;
        Err(Error::validation("tier", "upgrade refused"))
    });
    assert!(result.unwrap_err().is_validation());
    assert_eq!(fx.client.entity::<Customer>().get(&fx.ctx, id).unwrap().tier, "free");
}

#[test]
fn test_failed_edge_write_rolls_back_the_insert() {
    let fx = Fixture::new();
    let sso = fx.feature("sso");

    let err = fx
        .client
        .entity::<Plan>()
        .create()
        .set("name", "team")
        .set("price_cents", 2900)
        .add_edge_ids("features", [sso.id, 404])
        .save(&fx.ctx)
        .unwrap_err();
    assert!(err.is_constraint(), "{err:?}");
    assert_eq!(fx.client.query::<Plan>().count(&fx.ctx).unwrap(), 0);
    assert_eq!(
        fx.client
            .query::<Feature>()
            .filter(p::has_edge("plans"))
            .count(&fx.ctx)
            .unwrap(),
        0
    );
}

#[test]
fn test_builders_inside_tx_do_not_nest() {
    let fx = Fixture::new();
    let sso = fx.feature("sso");
    let tx = fx.client.tx(&fx.ctx).unwrap();
    let plan = tx
        .entity::<Plan>()
        .create()
        .set("name", "team")
        .set("price_cents", 2900)
        .add_edge_ids("features", [sso.id])
        .save(&fx.ctx)
        .unwrap();
    tx.entity::<Plan>()
        .update_one(&plan)
        .set("price_cents", 3900)
        .exec(&fx.ctx)
        .unwrap();
    tx.commit().unwrap();

    let stored = fx.client.entity::<Plan>().get(&fx.ctx, plan.id).unwrap();
    assert_eq!(stored.price_cents, 3900);
}

#[test]
fn test_root_write_cannot_slip_into_open_tx() {
    let fx = Fixture::new();
    let tx = fx.client.tx(&fx.ctx).unwrap();
    tx.entity::<Customer>()
        .create()
        .set("name", "Acme")
        .set("email", "billing@acme.test")
        .exec(&fx.ctx)
        .unwrap();

    let err = fx
        .client
        .entity::<Customer>()
        .create()
        .set("name", "Globex")
        .set("email", "ap@globex.test")
        .exec(&fx.ctx)
        .unwrap_err();
    assert!(!err.is_constraint(), "{err:?}");
    tx.rollback().unwrap();

    assert_eq!(fx.client.query::<Customer>().count(&fx.ctx).unwrap(), 0);
    fx.customer("Globex", "ap@globex.test");
    assert_eq!(fx.client.query::<Customer>().count(&fx.ctx).unwrap(), 1);
}

#[test]
fn test_root_write_from_other_thread_waits_for_tx() {
    let fx = Fixture::new();
    let tx = fx.client.tx(&fx.ctx).unwrap();
    tx.entity::<Customer>()
        .create()
        .set("name", "Acme")
        .set("email", "billing@acme.test")
        .exec(&fx.ctx)
        .unwrap();

    let root = fx.client.clone();
    let writer = std::thread::spawn(move || {
        root.entity::<Customer>()
            .create()
            .set("name", "Globex")
            .set("email", "ap@globex.test")
            .save(&entgraph::Context::background())
    });
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!writer.is_finished());
    tx.rollback().unwrap();
    let globex = writer.join().unwrap().unwrap();

    let names: Vec<String> = fx
        .client
        .query::<Customer>()
        .all(&fx.ctx)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec![globex.name]);
}
