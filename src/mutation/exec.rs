//! Statement generation and execution for mutations.

use sea_query::{Condition, DynIden, Expr, ExprTrait, InsertStatement, OnConflict, Query};
use std::sync::Arc;

use super::{EdgeChange, Mutation, MutationOutput, Op, Resolution};
use crate::context::Context;
use crate::driver::{Dialect, Driver, Statement};
use crate::error::{Error, Result};
use crate::hook::Mutator;
use crate::predicate::resolve;
use crate::schema::{EdgeDef, EntitySchema, IdType};
use crate::sql::{build_statement, col, ident, val};
use crate::tx::atomically;
use crate::value::{Row, Value};

/// Bottom of every hook chain.
pub(crate) struct Executor {
    pub(crate) driver: Arc<dyn Driver>,
}

impl Mutator for Executor {
    fn mutate(&self, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput> {
        ctx.check()?;
        m.mark_done()?;
        match m.op {
            Op::Create => create_rows(&self.driver, ctx, std::slice::from_mut(m)),
            Op::Update | Op::UpdateOne => update(&self.driver, ctx, m),
            Op::Delete | Op::DeleteOne => delete(&self.driver, ctx, m),
        }
    }
}

fn invalid(name: &str, err: Error) -> Error {
    match err {
        Error::Scan(reason) => Error::validation(name, reason),
        other => Error::validation(name, other.to_string()),
    }
}

fn edge_def(schema: &'static EntitySchema, name: &str) -> Result<&'static EdgeDef> {
    schema
        .edge(name)
        .map(|(_, def)| def)
        .ok_or_else(|| crate::predicate::unknown_edge(schema, name))
}

/// Pre-flight checks for a create; folds owner-side edges into fields.
pub(crate) fn check_create(m: &mut Mutation) -> Result<()> {
    m.take_error()?;
    let schema = m.schema;

    for (name, change) in &m.edges {
        let def = edge_def(schema, name)?;
        if def.is_unique() && change.added.len() > 1 {
            return Err(Error::validation(
                *name,
                format!("unique edge got {} ids", change.added.len()),
            ));
        }
        if def.fk_on_self() {
            if let Some(id) = change.added.first() {
                m.fields.insert(def.column.to_owned(), id.clone());
            }
        }
    }

    match m.id.take() {
        Some(id) => {
            let id = id
                .coerce(schema.id.ty.field_type())
                .map_err(|e| invalid(schema.id.column, e))?;
            m.id = Some(id);
        }
        None if schema.id.ty != IdType::Int => {
            return Err(Error::validation(schema.id.column, "missing required id"));
        }
        None => {}
    }

    for field in &schema.fields {
        match m.fields.get_mut(field.name) {
            Some(value) => {
                let coerced = std::mem::replace(value, Value::Null)
                    .coerce(field.ty)
                    .map_err(|e| invalid(field.name, e))?;
                field
                    .check(&coerced)
                    .map_err(|reason| Error::validation(field.name, reason))?;
                *value = coerced;
            }
            None if field.is_required() => {
                return Err(Error::validation(field.name, "missing required field"));
            }
            None => {}
        }
    }

    for def in schema.edges.iter().filter(|e| e.required) {
        let present = if def.fk_on_self() {
            m.fields.get(def.column).is_some_and(|v| !v.is_null())
        } else {
            m.edges.get(def.name).is_some_and(|c| !c.added.is_empty())
        };
        if !present {
            return Err(Error::validation(def.name, "missing required edge"));
        }
    }
    Ok(())
}

/// Pre-flight checks for an update. Runs before any statement is issued.
pub(crate) fn check_update(m: &mut Mutation) -> Result<()> {
    m.take_error()?;
    let schema = m.schema;

    if let Some(id) = m.id.take() {
        let id = id
            .coerce(schema.id.ty.field_type())
            .map_err(|e| invalid(schema.id.column, e))?;
        m.id = Some(id);
    }

    for (name, value) in m.fields.iter_mut() {
        let Some(field) = schema.field(name) else {
            return Err(Error::validation(name.as_str(), "unknown field"));
        };
        if field.immutable {
            return Err(Error::validation(field.name, "field is immutable"));
        }
        let coerced = std::mem::replace(value, Value::Null)
            .coerce(field.ty)
            .map_err(|e| invalid(field.name, e))?;
        field
            .check(&coerced)
            .map_err(|reason| Error::validation(field.name, reason))?;
        *value = coerced;
    }

    for name in &m.cleared {
        if let Some(def) = schema.edge_for_column(name).filter(|def| def.required) {
            return Err(Error::validation(
                def.name,
                format!("cannot clear \"{name}\" of required edge \"{}.{}\"", schema.label, def.name),
            ));
        }
        if let Some(field) = schema.field(name) {
            if !field.nullable {
                return Err(Error::validation(field.name, "field is not nullable"));
            }
        }
    }

    for (name, change) in &m.edges {
        let def = edge_def(schema, name)?;
        if def.required && def.is_unique() && change.cleared && !change.added.is_empty() {
            return Err(Error::validation(
                *name,
                format!("clearing a required unique edge \"{}.{}\"", schema.label, def.name),
            ));
        }
        if def.is_unique() && change.added.len() > 1 {
            return Err(Error::validation(
                *name,
                format!("unique edge got {} ids", change.added.len()),
            ));
        }
    }
    Ok(())
}

fn sea_values(values: &[Value]) -> Vec<sea_query::Value> {
    values.iter().map(Value::to_sea).collect()
}

/// Statements applying one edge change for the given source rows.
fn edge_statements(
    schema: &'static EntitySchema,
    def: &'static EdgeDef,
    sources: &[Value],
    change: &EdgeChange,
    dialect: Dialect,
) -> Result<Vec<Statement>> {
    let mut stmts = Vec::new();
    let added = &change.added;

    if let Some(link) = &def.link {
        if change.cleared {
            let mut q = Query::delete();
            q.from_table(ident(link.table))
                .and_where(col(link.table, link.source_column).is_in(sea_values(sources)));
            stmts.push(build_statement!(q, dialect)?);
        }
        if !change.removed.is_empty() {
            let mut q = Query::delete();
            q.from_table(ident(link.table))
                .and_where(col(link.table, link.source_column).is_in(sea_values(sources)))
                .and_where(col(link.table, link.target_column).is_in(sea_values(&change.removed)));
            stmts.push(build_statement!(q, dialect)?);
        }
        if !added.is_empty() {
            let mut q = Query::insert();
            q.into_table(ident(link.table))
                .columns([ident(link.source_column), ident(link.target_column)]);
            for source in sources {
                for target in added {
                    q.values([val(source), val(target)])
                        .map_err(|e| Error::Other(e.to_string()))?;
                }
            }
            stmts.push(build_statement!(q, dialect)?);
        }
        return Ok(stmts);
    }

    if def.fk_on_self() {
        // Cleared and added values are part of the row update itself.
        if !change.removed.is_empty() && !change.cleared && added.is_empty() {
            let mut q = Query::update();
            q.table(ident(schema.table))
                .values([(ident(def.column), val(&Value::Null))])
                .and_where(col(schema.table, schema.id.column).is_in(sea_values(sources)))
                .and_where(col(schema.table, def.column).is_in(sea_values(&change.removed)));
            stmts.push(build_statement!(q, dialect)?);
        }
        return Ok(stmts);
    }

    let target = def.target;
    if change.cleared {
        let mut q = Query::update();
        q.table(ident(target))
            .values([(ident(def.column), val(&Value::Null))])
            .and_where(col(target, def.column).is_in(sea_values(sources)));
        stmts.push(build_statement!(q, dialect)?);
    }
    if !change.removed.is_empty() {
        let mut q = Query::update();
        q.table(ident(target))
            .values([(ident(def.column), val(&Value::Null))])
            .and_where(col(target, def.target_id).is_in(sea_values(&change.removed)))
            .and_where(col(target, def.column).is_in(sea_values(sources)));
        stmts.push(build_statement!(q, dialect)?);
    }
    if !added.is_empty() {
        let [source] = sources else {
            return Err(Error::validation(
                def.name,
                format!("cannot attach targets to {} rows at once", sources.len()),
            ));
        };
        let mut q = Query::update();
        q.table(ident(target))
            .values([(ident(def.column), val(source))])
            .and_where(col(target, def.target_id).is_in(sea_values(added)));
        stmts.push(build_statement!(q, dialect)?);
    }
    Ok(stmts)
}

fn run_all(driver: &Arc<dyn Driver>, ctx: &Context, stmts: &[Statement]) -> Result<()> {
    for stmt in stmts {
        driver.exec(ctx, stmt)?;
    }
    Ok(())
}

fn conflict_clause(
    m: &Mutation,
    columns: &[&'static str],
    dialect: Dialect,
) -> Result<Option<OnConflict>> {
    let Some(conflict) = &m.conflict else {
        return Ok(None);
    };
    let schema = m.schema;
    for column in &conflict.columns {
        if !schema.valid_column(column) {
            return Err(Error::validation(column.as_str(), "unknown conflict column"));
        }
    }
    let targets: Vec<DynIden> = conflict.columns.iter().map(|c| ident(c)).collect();

    if conflict.resolution.contains(&Resolution::DoNothing) {
        if !dialect.supports_do_nothing() {
            return Err(Error::unsupported(dialect, "ON CONFLICT DO NOTHING"));
        }
        return Ok(Some(OnConflict::columns(targets).do_nothing().to_owned()));
    }

    let mut take_new: Vec<String> = Vec::new();
    let mut keep: Vec<&str> = Vec::new();
    let mut explicit: Vec<(&str, &Value)> = Vec::new();
    let mut ignore = false;
    for resolution in &conflict.resolution {
        match resolution {
            Resolution::UpdateNewValues => {
                for column in columns {
                    let immutable = schema.field(column).is_some_and(|f| f.immutable);
                    if *column != schema.id.column
                        && !immutable
                        && !conflict.columns.iter().any(|c| c == column)
                    {
                        take_new.push((*column).to_owned());
                    }
                }
            }
            Resolution::UpdateNew(column) => take_new.push(column.clone()),
            Resolution::Keep(column) => keep.push(column.as_str()),
            Resolution::SetValue(column, value) => explicit.push((column.as_str(), value)),
            Resolution::Ignore => ignore = true,
            Resolution::DoNothing => {}
        }
    }
    let mut seen: Vec<String> = Vec::new();
    take_new.retain(|c| {
        let keep_existing = keep.contains(&c.as_str()) || explicit.iter().any(|(e, _)| *e == c.as_str());
        let first = !seen.contains(c);
        seen.push(c.clone());
        first && !keep_existing
    });

    for column in take_new.iter().map(String::as_str).chain(explicit.iter().map(|(c, _)| *c)) {
        if !schema.valid_column(column) {
            return Err(Error::validation(column, "unknown column in conflict resolution"));
        }
    }

    let mut clause = OnConflict::columns(targets);
    if take_new.is_empty() && explicit.is_empty() {
        if !ignore {
            return Err(Error::validation(
                "on_conflict",
                format!("missing conflict resolution for {}", schema.table),
            ));
        }
        // Rewrite the row with its own values so RETURNING still yields it.
        let own: Vec<&str> = if columns.is_empty() {
            vec![schema.id.column]
        } else {
            columns.to_vec()
        };
        for column in own {
            clause.value(ident(column), col(schema.table, column));
        }
        return Ok(Some(clause));
    }
    if !take_new.is_empty() {
        clause.update_columns(take_new.iter().map(|c| ident(c)));
    }
    for (column, value) in explicit {
        clause.value(ident(column), val(value));
    }
    Ok(Some(clause))
}

/// Row as seen by entity scanning, built from the inserted values.
pub(crate) fn inserted_row(m: &Mutation, id: &Value) -> Row {
    let schema = m.schema;
    let pairs = schema.columns().into_iter().map(|column| {
        let value = if column == schema.id.column {
            id.clone()
        } else {
            m.fields.get(column).cloned().unwrap_or(Value::Null)
        };
        (column, value)
    });
    Row::from_pairs(pairs)
}

/// Validate and insert rows of one table with a single INSERT, then apply
/// their edges.
pub(crate) fn create_rows(
    driver: &Arc<dyn Driver>,
    ctx: &Context,
    muts: &mut [Mutation],
) -> Result<MutationOutput> {
    let Some(schema) = muts.first().map(|m| m.schema) else {
        return Ok(MutationOutput::default());
    };
    let dialect = driver.dialect();
    for m in muts.iter_mut() {
        check_create(m)?;
    }
    let muts: &[Mutation] = muts;
    let first = &muts[0];

    let with_id = muts.iter().any(|m| m.id.is_some());
    let mut columns: Vec<&'static str> = Vec::new();
    if with_id {
        columns.push(schema.id.column);
    }
    for field in &schema.fields {
        if muts.iter().any(|m| m.fields.contains_key(field.name)) {
            columns.push(field.name);
        }
    }

    let mut insert: InsertStatement = Query::insert();
    insert.into_table(ident(schema.table));
    if columns.is_empty() {
        insert.or_default_values_many(muts.len() as u32);
    } else {
        insert.columns(columns.iter().map(|c| ident(c)));
        for m in muts.iter() {
            let row: Vec<Expr> = columns
                .iter()
                .map(|c| {
                    let value = if *c == schema.id.column {
                        m.id.clone().unwrap_or(Value::Null)
                    } else {
                        m.fields.get(*c).cloned().unwrap_or(Value::Null)
                    };
                    val(&value)
                })
                .collect();
            insert.values(row).map_err(|e| Error::Other(e.to_string()))?;
        }
    }

    let upsert = first.conflict.is_some();
    if let Some(clause) = conflict_clause(first, &columns, dialect)? {
        insert.on_conflict(clause);
    }
    let generated = muts.iter().any(|m| m.id.is_none());
    let returning = dialect.supports_returning() && (generated || upsert);
    if returning {
        insert.returning_col(ident(schema.id.column));
    }
    let stmt = build_statement!(insert, dialect)?;

    let mut edges: Vec<(usize, &'static EdgeDef)> = Vec::new();
    for (i, m) in muts.iter().enumerate() {
        for (name, change) in &m.edges {
            let def = edge_def(schema, name)?;
            if !def.fk_on_self() && !change.is_empty() {
                edges.push((i, def));
            }
        }
    }

    let run = |d: &Arc<dyn Driver>| -> Result<MutationOutput> {
        let mut ids: Vec<Value> = Vec::with_capacity(muts.len());
        let affected;
        if returning {
            let rows = d.query(ctx, &stmt)?;
            affected = rows.len() as u64;
            for row in rows {
                let id = row
                    .get_at::<Value>(0)?
                    .coerce(schema.id.ty.field_type())?;
                ids.push(id);
            }
        } else {
            let res = d.exec(ctx, &stmt)?;
            affected = res.rows_affected;
            let mut next = res.last_insert_id;
            for m in muts.iter() {
                match &m.id {
                    Some(id) => ids.push(id.clone()),
                    None => {
                        // Backends without RETURNING report the first generated id.
                        let id = next.ok_or_else(|| {
                            Error::driver_msg("driver did not report a generated id")
                        })?;
                        ids.push(Value::Int(id));
                        next = Some(id + 1);
                    }
                }
            }
        }

        if !upsert && ids.len() != muts.len() {
            return Err(Error::driver_msg(format!(
                "inserted {} rows into {} but got {} ids",
                muts.len(),
                schema.table,
                ids.len()
            )));
        }
        for &(i, def) in &edges {
            let (Some(m), Some(id)) = (muts.get(i), ids.get(i)) else {
                continue;
            };
            if let Some(change) = m.edges.get(def.name) {
                let stmts = edge_statements(schema, def, std::slice::from_ref(id), change, dialect)?;
                run_all(d, ctx, &stmts)?;
            }
        }

        let row = match (muts, ids.first()) {
            ([m], Some(id)) => Some(inserted_row(m, id)),
            _ => None,
        };
        Ok(MutationOutput { affected, row, ids })
    };

    if edges.is_empty() {
        run(driver)
    } else {
        atomically(driver, ctx, run)
    }
}

/// Combined filter of a single-row id and the mutation's predicates.
fn target_condition(m: &Mutation) -> Result<Option<Condition>> {
    let schema = m.schema;
    let (cond, mut errors) = resolve(schema, &m.predicates);
    if !errors.is_empty() {
        return Err(errors.remove(0));
    }
    let by_id = m
        .id
        .as_ref()
        .map(|id| col(schema.table, schema.id.column).eq(id.to_sea()));
    Ok(match (by_id, cond) {
        (Some(id), Some(cond)) => Some(Condition::all().add(id).add(cond)),
        (Some(id), None) => Some(Condition::all().add(id)),
        (None, cond) => cond,
    })
}

fn select_row(
    driver: &Arc<dyn Driver>,
    ctx: &Context,
    schema: &'static EntitySchema,
    id: &Value,
) -> Result<Row> {
    let mut q = Query::select();
    for column in schema.columns() {
        q.column((ident(schema.table), ident(column)));
    }
    q.from(ident(schema.table))
        .and_where(col(schema.table, schema.id.column).eq(id.to_sea()));
    let stmt = build_statement!(q, driver.dialect())?;
    driver
        .query(ctx, &stmt)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(schema.label))
}

fn update(driver: &Arc<dyn Driver>, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput> {
    check_update(m)?;
    let schema = m.schema;
    let dialect = driver.dialect();
    let single = m.op == Op::UpdateOne;
    if single && m.id.is_none() {
        return Err(Error::validation(schema.id.column, "missing id for UpdateOne"));
    }

    let mut sets: Vec<(DynIden, Expr)> = m
        .fields
        .iter()
        .map(|(name, value)| (ident(name), val(value)))
        .collect();
    for name in &m.cleared {
        sets.push((ident(name), val(&Value::Null)));
    }

    let mut edge_changes: Vec<(&'static EdgeDef, &EdgeChange)> = Vec::new();
    for (name, change) in &m.edges {
        let def = edge_def(schema, name)?;
        if def.fk_on_self() {
            if let Some(id) = change.added.first() {
                sets.push((ident(def.column), val(id)));
            } else if change.cleared {
                sets.push((ident(def.column), val(&Value::Null)));
            } else if !change.removed.is_empty() {
                edge_changes.push((def, change));
            }
        } else if !change.is_empty() {
            edge_changes.push((def, change));
        }
    }
    let cond = target_condition(m)?;

    if !single && edge_changes.is_empty() {
        if sets.is_empty() {
            return Ok(MutationOutput::default());
        }
        let mut q = Query::update();
        q.table(ident(schema.table)).values(sets);
        if let Some(cond) = cond {
            q.cond_where(cond);
        }
        let stmt = build_statement!(q, dialect)?;
        let res = driver.exec(ctx, &stmt)?;
        return Ok(MutationOutput {
            affected: res.rows_affected,
            ..Default::default()
        });
    }

    atomically(driver, ctx, |d| {
        let mut select = Query::select();
        select
            .column((ident(schema.table), ident(schema.id.column)))
            .from(ident(schema.table));
        if let Some(cond) = cond.clone() {
            select.cond_where(cond);
        }
        if dialect.supports_row_locking() {
            select.lock_exclusive();
        }
        let stmt = build_statement!(select, dialect)?;
        let ids: Vec<Value> = d
            .query(ctx, &stmt)?
            .iter()
            .map(|row| row.get_at::<Value>(0)?.coerce(schema.id.ty.field_type()))
            .collect::<Result<_>>()?;
        if ids.is_empty() {
            if single {
                return Err(Error::not_found(schema.label));
            }
            return Ok(MutationOutput::default());
        }

        if !sets.is_empty() {
            let mut q = Query::update();
            q.table(ident(schema.table))
                .values(sets.clone())
                .and_where(col(schema.table, schema.id.column).is_in(sea_values(&ids)));
            let stmt = build_statement!(q, dialect)?;
            d.exec(ctx, &stmt)?;
        }
        for &(def, change) in &edge_changes {
            let stmts = edge_statements(schema, def, &ids, change, dialect)?;
            run_all(d, ctx, &stmts)?;
        }

        let row = match (single, ids.first()) {
            (true, Some(id)) => Some(select_row(d, ctx, schema, id)?),
            _ => None,
        };
        Ok(MutationOutput {
            affected: ids.len() as u64,
            row,
            ids,
        })
    })
}

fn delete(driver: &Arc<dyn Driver>, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput> {
    m.take_error()?;
    let schema = m.schema;
    if m.op == Op::DeleteOne && m.id.is_none() {
        return Err(Error::validation(schema.id.column, "missing id for DeleteOne"));
    }
    if let Some(id) = m.id.take() {
        m.id = Some(
            id.coerce(schema.id.ty.field_type())
                .map_err(|e| invalid(schema.id.column, e))?,
        );
    }
    let mut q = Query::delete();
    q.from_table(ident(schema.table));
    if let Some(cond) = target_condition(m)? {
        q.cond_where(cond);
    }
    let stmt = build_statement!(q, driver.dialect())?;
    let res = driver.exec(ctx, &stmt)?;
    if m.op == Op::DeleteOne && res.rows_affected == 0 {
        return Err(Error::not_found(schema.label));
    }
    Ok(MutationOutput {
        affected: res.rows_affected,
        ..Default::default()
    })
}
