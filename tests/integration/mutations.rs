//! Create, update, delete and upsert builders against SQLite.

mod common;

use common::{Customer, Feature, Fixture, Invoice, Plan};
use entgraph::mutation::Op;
use entgraph::predicate as p;
use entgraph::{Error, Value};

#[test]
fn test_create_applies_defaults_and_returns_entity() {
    let fx = Fixture::new();
    let acme = fx
        .client
        .entity::<Customer>()
        .create()
        .set("name", "Acme")
        .set("email", "billing@acme.test")
        .set_opt("note", None::<String>)
        .save(&fx.ctx)
        .unwrap();

    assert_eq!(acme.id, 1);
    assert_eq!(acme.tier, "free");
    assert_eq!(acme.note, None);
    assert_eq!(fx.recorder.len(), 1);

    let stored = fx.client.entity::<Customer>().get(&fx.ctx, acme.id).unwrap();
    assert_eq!(stored.email, "billing@acme.test");
    assert_eq!(stored.tier, "free");
}

#[test]
fn test_create_validation() {
    let fx = Fixture::new();
    let customers = fx.client.entity::<Customer>();

    let err = customers.create().set("name", "Acme").save(&fx.ctx).unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "email"));

    let err = customers
        .create()
        .set("name", "")
        .set("email", "x@acme.test")
        .save(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "name"));

    let err = customers
        .create()
        .set("name", "Acme")
        .set("email", "x@acme.test")
        .set("tier", "diamond")
        .save(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "tier"));

    let err = customers
        .create()
        .set("name", "Acme")
        .set("email", "x@acme.test")
        .set("nickname", "acme")
        .save(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "nickname"));

    assert!(fx.recorder.is_empty());
}

#[test]
fn test_create_requires_required_edge() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    let globex = fx.customer("Globex", "ap@globex.test");
    fx.reset();

    let err = fx
        .client
        .entity::<Invoice>()
        .create()
        .set("number", "INV-1")
        .set("amount_cents", 100)
        .save(&fx.ctx)
        .unwrap_err();
    assert!(err.is_validation());

    let err = fx
        .client
        .entity::<Invoice>()
        .create()
        .set("number", "INV-1")
        .set("amount_cents", 100)
        .add_edge_ids("customer", [acme.id, globex.id])
        .save(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "customer"));

    let err = fx
        .client
        .entity::<Invoice>()
        .create()
        .set("number", "INV-1")
        .set("amount_cents", -5)
        .set_edge_id("customer", acme.id)
        .save(&fx.ctx)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "amount_cents"));
    assert!(fx.recorder.is_empty());
}

#[test]
fn test_unique_violation_is_a_constraint_error() {
    let fx = Fixture::new();
    fx.customer("Acme", "billing@acme.test");
    let err = fx
        .client
        .entity::<Customer>()
        .create()
        .set("name", "Acme Again")
        .set("email", "billing@acme.test")
        .save(&fx.ctx)
        .unwrap_err();
    assert!(err.is_constraint(), "{err:?}");
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_create_with_to_many_edges() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    let globex = fx.customer("Globex", "ap@globex.test");
    let stray = fx.invoice(&globex, "INV-7", 700);

    let sso = fx.feature("sso");
    let api = fx.feature("api");
    let plan = fx
        .client
        .entity::<Plan>()
        .create()
        .set("name", "team")
        .set("price_cents", 2900)
        .add_edge_ids("features", [sso.id, api.id])
        .save(&fx.ctx)
        .unwrap();
    let linked = fx
        .client
        .query::<Feature>()
        .filter(p::has_edge_with::<Feature, Plan>("plans", vec![p::id_eq(plan.id)]))
        .count(&fx.ctx)
        .unwrap();
    assert_eq!(linked, 2);

    // Attaching an existing invoice to a new owner moves its foreign key.
    let moved = fx
        .client
        .entity::<Customer>()
        .update_one(&acme)
        .add_edge_ids("invoices", [stray.id])
        .save(&fx.ctx)
        .unwrap();
    assert_eq!(moved.id, acme.id);
    let stray = fx.client.entity::<Invoice>().get(&fx.ctx, stray.id).unwrap();
    assert_eq!(stray.customer_id, acme.id);
}

#[test]
fn test_create_bulk_uses_one_insert() {
    let fx = Fixture::new();
    let customers = fx.client.entity::<Customer>();
    let builders = (1..=3)
        .map(|i| {
            customers
                .create()
                .set("name", format!("Customer {i}"))
                .set("email", format!("c{i}@example.test"))
        })
        .collect();

    let created = customers.create_bulk(builders).save(&fx.ctx).unwrap();
    assert_eq!(created.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(created.iter().all(|c| c.tier == "free"));
    assert_eq!(fx.recorder.len(), 1);
    assert_eq!(customers.query().count(&fx.ctx).unwrap(), 3);

    let empty = customers.create_bulk(Vec::new());
    assert!(empty.is_empty());
    assert!(empty.save(&fx.ctx).unwrap().is_empty());
}

#[test]
fn test_bulk_update_returns_affected_count() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    fx.invoice(&acme, "INV-1", 100);
    fx.invoice(&acme, "INV-2", 200);
    fx.invoice(&acme, "INV-3", 300);

    let paid = fx
        .client
        .entity::<Invoice>()
        .update()
        .filter(p::lt("amount_cents", 250))
        .set("status", "paid")
        .save(&fx.ctx)
        .unwrap();
    assert_eq!(paid, 2);
    let open = fx
        .client
        .query::<Invoice>()
        .filter(p::eq("status", "open"))
        .only(&fx.ctx)
        .unwrap();
    assert_eq!(open.number, "INV-3");

    let none = fx
        .client
        .entity::<Invoice>()
        .update()
        .filter(p::eq("number", "INV-404"))
        .set("status", "void")
        .save(&fx.ctx)
        .unwrap();
    assert_eq!(none, 0);
}

#[test]
fn test_update_one_returns_refreshed_entity() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");

    let updated = fx
        .client
        .entity::<Customer>()
        .update_one(&acme)
        .set("tier", "platinum")
        .set("note", "key account")
        .save(&fx.ctx)
        .unwrap();
    assert_eq!(updated.tier, "platinum");
    assert_eq!(updated.note.as_deref(), Some("key account"));

    let cleared = fx
        .client
        .entity::<Customer>()
        .update_one_id(acme.id)
        .clear("note")
        .set_opt("tier", None::<&str>)
        .save(&fx.ctx)
        .unwrap();
    assert_eq!(cleared.note, None);
    assert_eq!(cleared.tier, "platinum");

    let err = fx
        .client
        .entity::<Customer>()
        .update_one_id(42)
        .set("tier", "gold")
        .save(&fx.ctx)
        .unwrap_err();
    assert!(err.is_not_found());

    let err = fx
        .client
        .entity::<Customer>()
        .update_one(&acme)
        .filter(p::eq("tier", "free"))
        .set("name", "Acme Corp")
        .save(&fx.ctx)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_update_validation_issues_no_statements() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    let globex = fx.customer("Globex", "ap@globex.test");
    let invoice = fx.invoice(&acme, "INV-1", 100);
    fx.reset();

    let invoices = fx.client.entity::<Invoice>();

    let contradictory = invoices
        .update_one(&invoice)
        .clear_edge("customer")
        .set_edge_id("customer", globex.id);
    let err = contradictory.check().unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "customer"));
    let err = contradictory.save(&fx.ctx).unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "customer"));

    let err = invoices.update_one(&invoice).set("number", "INV-9").save(&fx.ctx).unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "number"));

    let err = invoices.update_one(&invoice).clear("status").save(&fx.ctx).unwrap_err();
    assert!(matches!(err, Error::Validation { ref name, .. } if name == "status"));

    let err = invoices.update().set("amount_cents", -1).save(&fx.ctx).unwrap_err();
    assert!(err.is_validation());

    assert!(fx.recorder.is_empty(), "{:?}", fx.recorder.sql());
    assert!(invoices.update_one(&invoice).set("status", "paid").check().is_ok());
}

#[test]
fn test_update_many_to_many_edges() {
    let fx = Fixture::new();
    let sso = fx.feature("sso");
    let api = fx.feature("api");
    let audit = fx.feature("audit-log");
    let plan = fx
        .client
        .entity::<Plan>()
        .create()
        .set("name", "team")
        .set("price_cents", 2900)
        .add_edge_ids("features", [sso.id, api.id])
        .save(&fx.ctx)
        .unwrap();

    fx.client
        .entity::<Plan>()
        .update_one(&plan)
        .remove_edge_ids("features", [sso.id])
        .add_edge_ids("features", [audit.id])
        .save(&fx.ctx)
        .unwrap();
    let loaded = fx
        .client
        .query::<Plan>()
        .with::<Feature, _>("features", |q| q.order_asc("key"))
        .only(&fx.ctx)
        .unwrap();
    let keys: Vec<&str> = loaded.features().unwrap().iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, vec!["api", "audit-log"]);

    fx.client
        .entity::<Plan>()
        .update_one(&plan)
        .clear_edge("features")
        .save(&fx.ctx)
        .unwrap();
    let loaded = fx
        .client
        .query::<Plan>()
        .with_edge::<Feature>("features")
        .only(&fx.ctx)
        .unwrap();
    assert!(loaded.features().unwrap().is_empty());
}

#[test]
fn test_delete_one_not_found_then_success() {
    let fx = Fixture::new();
    let initech = fx.customer("Initech", "finance@initech.test");
    let customers = fx.client.entity::<Customer>();

    let err = customers.delete_one_id(initech.id + 1).exec(&fx.ctx).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "entgraph: customer not found");

    customers.delete_one(&initech).exec(&fx.ctx).unwrap();
    assert!(customers.get(&fx.ctx, initech.id).unwrap_err().is_not_found());
    assert!(customers.delete_one(&initech).exec(&fx.ctx).unwrap_err().is_not_found());
}

#[test]
fn test_bulk_delete_and_foreign_keys() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    fx.invoice(&acme, "INV-1", 100);
    fx.invoice(&acme, "INV-2", 0);
    fx.invoice(&acme, "INV-3", 300);

    let err = fx.client.entity::<Customer>().delete_one(&acme).exec(&fx.ctx).unwrap_err();
    assert!(err.is_constraint(), "{err:?}");

    let removed = fx
        .client
        .entity::<Invoice>()
        .delete()
        .filter(p::gt("amount_cents", 0))
        .exec(&fx.ctx)
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(fx.client.query::<Invoice>().count(&fx.ctx).unwrap(), 1);
    assert_eq!(fx.client.entity::<Invoice>().delete().exec(&fx.ctx).unwrap(), 1);
}

#[test]
fn test_upsert_updates_only_named_columns() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    let customers = fx.client.entity::<Customer>();

    let id = customers
        .create()
        .set("name", "Acme Corp")
        .set("email", "billing@acme.test")
        .set("tier", "gold")
        .on_conflict(&["email"])
        .update_new("name")
        .id(&fx.ctx)
        .unwrap();
    assert_eq!(id, Value::Int(acme.id));

    let stored = customers.get(&fx.ctx, acme.id).unwrap();
    assert_eq!(stored.name, "Acme Corp");
    assert_eq!(stored.tier, "free");
    assert_eq!(customers.query().count(&fx.ctx).unwrap(), 1);

    // No conflict: a plain insert.
    let id = customers
        .create()
        .set("name", "Globex")
        .set("email", "ap@globex.test")
        .on_conflict(&["email"])
        .update_new_values()
        .id(&fx.ctx)
        .unwrap();
    // The conflicting upsert above consumed an AUTOINCREMENT value.
    assert_ne!(id, Value::Int(acme.id));
    assert_eq!(customers.get(&fx.ctx, id).unwrap().name, "Globex");
    assert_eq!(customers.query().count(&fx.ctx).unwrap(), 2);
}

#[test]
fn test_upsert_resolutions() {
    let fx = Fixture::new();
    let acme = fx.customer("Acme", "billing@acme.test");
    let customers = fx.client.entity::<Customer>();
    let conflicting = || {
        customers
            .create()
            .set("name", "Acme Holdings")
            .set("email", "billing@acme.test")
            .set("tier", "platinum")
            .set("note", "merged")
    };

    conflicting()
        .on_conflict(&["email"])
        .update_new_values()
        .keep("name")
        .exec(&fx.ctx)
        .unwrap();
    let stored = customers.get(&fx.ctx, acme.id).unwrap();
    assert_eq!(stored.name, "Acme");
    assert_eq!(stored.tier, "platinum");
    assert_eq!(stored.note.as_deref(), Some("merged"));

    conflicting()
        .on_conflict(&["email"])
        .set_value("tier", "gold")
        .exec(&fx.ctx)
        .unwrap();
    assert_eq!(customers.get(&fx.ctx, acme.id).unwrap().tier, "gold");

    let id = conflicting().on_conflict(&["email"]).ignore().id(&fx.ctx).unwrap();
    assert_eq!(id, Value::Int(acme.id));
    assert_eq!(customers.get(&fx.ctx, acme.id).unwrap().tier, "gold");

    let err = conflicting().on_conflict(&["email"]).do_nothing().id(&fx.ctx).unwrap_err();
    assert!(err.is_not_found());
    conflicting().on_conflict(&["email"]).do_nothing().exec(&fx.ctx).unwrap();

    let err = conflicting().on_conflict(&["email"]).exec(&fx.ctx).unwrap_err();
    assert!(err.is_validation());
    let err = conflicting()
        .on_conflict(&["handle"])
        .update_new_values()
        .exec(&fx.ctx)
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_builders_expose_their_mutation() {
    let fx = Fixture::new();
    let create = fx
        .client
        .entity::<Customer>()
        .create()
        .set("name", "Acme")
        .set("email", "billing@acme.test");
    let m = create.mutation();
    assert_eq!(m.op(), Op::Create);
    assert_eq!(m.table(), "customers");
    assert_eq!(m.field("name"), Some(&Value::from("Acme")));
    assert_eq!(m.fields().count(), 2);

    let delete = fx.client.entity::<Customer>().delete_one_id(7);
    assert_eq!(delete.mutation().op(), Op::DeleteOne);
    assert_eq!(delete.mutation().id(), Some(&Value::Int(7)));
}
