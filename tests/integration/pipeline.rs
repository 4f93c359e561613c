//! Mutation hooks and query interceptors registered on the client.

mod common;

use std::sync::{Arc, Mutex};

use common::{Customer, Fixture, Invoice};
use entgraph::hook::{self, Hook};
use entgraph::intercept;
use entgraph::mutation::{MutationOutput, Op};
use entgraph::predicate as p;
use entgraph::Value;
use sea_query::ExprTrait;

type Trail = Arc<Mutex<Vec<String>>>;

fn tracing_hook(trail: &Trail, name: &'static str) -> Hook {
    let trail = Arc::clone(trail);
    hook::func(move |ctx, m, next| {
        trail.lock().unwrap().push(format!("{name}:before:{}", m.op()));
        let out = next.mutate(ctx, m);
        trail.lock().unwrap().push(format!("{name}:after"));
        out
    })
}

#[test]
fn test_hooks_run_in_registration_order() {
    let trail: Trail = Arc::default();
    let fx = Fixture::with(|b| {
        b.hook(tracing_hook(&trail, "outer"))
            .hook(tracing_hook(&trail, "inner"))
    });
    fx.customer("Acme", "billing@acme.test");

    assert_eq!(
        *trail.lock().unwrap(),
        vec![
            "outer:before:Create",
            "inner:before:Create",
            "inner:after",
            "outer:after",
        ]
    );
}

#[test]
fn test_short_circuit_skips_execution() {
    let fx = Fixture::with(|b| {
        b.hook(hook::on(
            hook::func(|_, _, _| {
                Ok(MutationOutput {
                    affected: 0,
                    ..Default::default()
                })
            }),
            &[Op::Delete],
        ))
    });
    let acme = fx.customer("Acme", "billing@acme.test");
    fx.reset();

    let removed = fx.client.entity::<Customer>().delete().exec(&fx.ctx).unwrap();
    assert_eq!(removed, 0);
    assert!(fx.recorder.is_empty());
    assert!(fx.client.entity::<Customer>().get(&fx.ctx, acme.id).is_ok());
}

#[test]
fn test_hooks_can_rewrite_mutations() {
    let fx = Fixture::with(|b| {
        b.hook(hook::for_table(
            "customers",
            hook::on(
                hook::func(|ctx, m, next| {
                    if let Some(Value::String(email)) = m.field("email") {
                        let lowered = email.to_lowercase();
                        m.set_field("email", lowered);
                    }
                    next.mutate(ctx, m)
                }),
                &[Op::Create, Op::Update, Op::UpdateOne],
            ),
        ))
    });
    let acme = fx.customer("Acme", "Billing@ACME.test");
    assert_eq!(acme.email, "billing@acme.test");

    let updated = fx
        .client
        .entity::<Customer>()
        .update_one(&acme)
        .set("email", "AP@ACME.test")
        .save(&fx.ctx)
        .unwrap();
    assert_eq!(updated.email, "ap@acme.test");
}

#[test]
fn test_reject_is_scoped_to_table_and_ops() {
    let fx = Fixture::with(|b| {
        b.hook(hook::for_table(
            "invoices",
            hook::reject(&[Op::Delete, Op::DeleteOne]),
        ))
    });
    let acme = fx.customer("Acme", "billing@acme.test");
    let invoice = fx.invoice(&acme, "INV-1", 100);
    let initech = fx.customer("Initech", "finance@initech.test");

    let err = fx
        .client
        .entity::<Invoice>()
        .delete_one(&invoice)
        .exec(&fx.ctx)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "entgraph: DeleteOne operation is not allowed on invoices"
    );
    fx.client.entity::<Customer>().delete_one(&initech).exec(&fx.ctx).unwrap();
}

#[test]
fn test_bulk_create_runs_hooks_per_row() {
    let trail: Trail = Arc::default();
    let seen = Arc::clone(&trail);
    let fx = Fixture::with(|b| {
        b.hook(hook::func(move |ctx, m, next| {
            let email = m.field("email").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
            seen.lock().unwrap().push(email.clone());
            if email.ends_with("@spam.test") {
                return Ok(MutationOutput::default());
            }
            next.mutate(ctx, m)
        }))
    });
    let customers = fx.client.entity::<Customer>();
    let created = customers
        .create_bulk(vec![
            customers.create().set("name", "Acme").set("email", "billing@acme.test"),
            customers.create().set("name", "Spam").set("email", "win@spam.test"),
            customers.create().set("name", "Globex").set("email", "ap@globex.test"),
        ])
        .save(&fx.ctx)
        .unwrap();

    assert_eq!(trail.lock().unwrap().len(), 3);
    let names: Vec<&str> = created.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Acme", "Globex"]);
    assert_eq!(customers.query().count(&fx.ctx).unwrap(), 2);
}

#[test]
fn test_traverse_interceptor_filters_every_query() {
    let fx = Fixture::with(|b| {
        b.intercept(intercept::for_table(
            "invoices",
            intercept::traverse(|_, spec| {
                spec.where_(|s| {
                    let status = s.column("status");
                    s.where_(status.ne("void"));
                });
                Ok(())
            }),
        ))
    });
    let acme = fx.customer("Acme", "billing@acme.test");
    fx.invoice(&acme, "INV-1", 100);
    let voided = fx.invoice(&acme, "INV-2", 200);
    fx.client
        .entity::<Invoice>()
        .update_one(&voided)
        .set("status", "void")
        .save(&fx.ctx)
        .unwrap();

    assert_eq!(fx.client.query::<Invoice>().count(&fx.ctx).unwrap(), 1);

    let loaded = fx
        .client
        .query::<Customer>()
        .with_edge::<Invoice>("invoices")
        .only(&fx.ctx)
        .unwrap();
    assert_eq!(loaded.invoices().unwrap().len(), 1);

    // The filter also holds on the source side of a traversal.
    let owners = fx
        .client
        .query::<Invoice>()
        .filter(p::eq("number", "INV-2"))
        .query_edge::<Customer>("customer")
        .all(&fx.ctx)
        .unwrap();
    assert!(owners.is_empty());
}

#[test]
fn test_interceptor_post_filters_rows() {
    let fx = Fixture::with(|b| {
        b.intercept(intercept::func(|ctx, spec, next| {
            let table = spec.table();
            let mut rows = next.query(ctx, spec)?;
            if table == "customers" {
                rows.retain(|row| row.value("tier") != Some(&Value::from("platinum")));
            }
            Ok(rows)
        }))
    });
    let acme = fx.customer("Acme", "billing@acme.test");
    fx.customer("Globex", "ap@globex.test");
    fx.client
        .entity::<Customer>()
        .update_one(&acme)
        .set("tier", "platinum")
        .save(&fx.ctx)
        .unwrap();

    let visible = fx.client.query::<Customer>().all(&fx.ctx).unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "Globex");
}

#[test]
fn test_interceptor_can_fail_queries() {
    let fx = Fixture::with(|b| {
        b.intercept(intercept::for_table(
            "customers",
            intercept::traverse(|_, spec| {
                if spec.limit().is_none() {
                    spec.fail(entgraph::Error::validation("limit", "customer queries must be paged"));
                }
                Ok(())
            }),
        ))
    });
    let err = fx.client.query::<Customer>().all(&fx.ctx).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(fx.queries(), 0);
    assert!(fx.client.query::<Customer>().limit(5).all(&fx.ctx).unwrap().is_empty());
}

#[test]
fn test_hooks_see_inserted_ids_after_next() {
    let seen: Arc<Mutex<Vec<(String, Vec<Value>)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let fx = Fixture::with(|b| {
        b.hook(hook::on(
            hook::func(move |ctx, m, next| {
                let email = m.field("email").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
                let out = next.mutate(ctx, m)?;
                assert!(out.row.is_some());
                sink.lock().unwrap().push((email, out.ids.clone()));
                Ok(out)
            }),
            &[Op::Create],
        ))
    });
    let acme = fx.customer("Acme", "billing@acme.test");
    let customers = fx.client.entity::<Customer>();
    fx.reset();
    let created = customers
        .create_bulk(vec![
            customers.create().set("name", "Globex").set("email", "ap@globex.test"),
            customers.create().set("name", "Initech").set("email", "finance@initech.test"),
        ])
        .save(&fx.ctx)
        .unwrap();
    // One INSERT for the whole batch.
    assert_eq!(fx.recorder.sql().len(), 1);

    let seen = seen.lock().unwrap();
    // Chains nest, so the outermost row finishes last.
    assert_eq!(
        *seen,
        vec![
            ("billing@acme.test".to_owned(), vec![Value::Int(acme.id)]),
            ("finance@initech.test".to_owned(), vec![Value::Int(created[1].id)]),
            ("ap@globex.test".to_owned(), vec![Value::Int(created[0].id)]),
        ]
    );
}
