//! Load pipeline.
//!
//! Each pass reads one record and rebuilds it in two phases. Pass A walks
//! node snapshots parent-first, recreating missing nodes under their
//! recorded parent, then makes sure every stored component exists on its
//! node. Pass B writes the stored fields back, so references between
//! components resolve against objects that all exist by then.

use crate::codec;
use crate::component::PersistState;
use crate::descriptor::{DecodedItem, Envelope};
use crate::error::PersistError;
use crate::id::*;
use crate::node::{NodeSnapshot, NODE_TAG};
use crate::pacing::{offload, ExecutionMode, Pacer};
use crate::save::check_setup;
use crate::scope::{Pass, PassFilter, SaveScope};
use crate::session::Session;
use crate::storage::Store;
use std::collections::HashSet;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A recoverable gap met while loading. The rest of the load goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMiss {
    /// The component's node is neither live nor in the record.
    OrphanedComponent {
        type_tag: String,
        component_id: StableId,
        node_id: StableId,
    },
    /// No registered descriptor matches the stored tag.
    UnknownType { type_tag: String },
    /// The stored id is bound to a behaviour of a different type.
    TypeMismatch {
        type_tag: String,
        component_id: StableId,
    },
    /// The group has no record on disk.
    MissingGroup(GroupId),
    /// The named level has no record on disk.
    MissingLevel(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Labels of the passes that found a record.
    pub passes: Vec<String>,
    pub nodes_created: usize,
    pub components_created: usize,
    /// Components whose stored fields were written back.
    pub restored: usize,
    pub misses: Vec<LoadMiss>,
    /// Times the pipeline yielded to the scheduler.
    pub yields: usize,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

async fn plan(
    session: &Session,
    scope: &SaveScope,
    store: &Store,
    mode: ExecutionMode,
) -> Result<Vec<Pass>, PersistError> {
    let paths = session.paths();
    let ext = session.settings.file_extension.as_str();
    match scope {
        SaveScope::Groups(GroupSelector::All) => {
            let (s, groups) = (store.clone(), session.groups.clone());
            let found = offload(mode, move || Ok(s.discover_groups(&groups))).await?;
            found
                .into_iter()
                .map(|group| Pass::for_group(&paths, &session.groups, group, ext).map_err(PersistError::from))
                .collect()
        }
        SaveScope::Groups(GroupSelector::Only(group)) => {
            Ok(vec![Pass::for_group(&paths, &session.groups, *group, ext)?])
        }
        SaveScope::Level { name, root } => {
            if !session.graph.contains_node(*root) {
                return Err(PersistError::Setup {
                    type_name: "level root",
                    reason: "node does not exist",
                });
            }
            Ok(vec![Pass::for_level(&paths, name, *root, ext)?])
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub(crate) async fn run(
    session: &mut Session,
    scope: &SaveScope,
    mode: ExecutionMode,
) -> Result<LoadReport, PersistError> {
    let started = Instant::now();
    session.identities.rebuild(&mut session.graph);

    let store = session.store();
    let passes = plan(session, scope, &store, mode).await?;
    check_setup(session, &passes)?;

    let mut pacer = Pacer::new(mode, session.settings.effective_batch_size());
    let mut report = LoadReport::default();
    for pass in &passes {
        load_pass(session, pass, &store, mode, &mut pacer, &mut report).await?;
    }
    session.identities.rebuild(&mut session.graph);
    report.yields = pacer.yields();

    log::info!(
        "loaded {} pass(es): {} node(s) and {} component(s) created, {} restored in {:.3?} ({} item(s), {} yield(s))",
        report.passes.len(),
        report.nodes_created,
        report.components_created,
        report.restored,
        started.elapsed(),
        pacer.processed(),
        report.yields
    );
    Ok(report)
}

fn decode_error(type_tag: &str, err: impl ToString) -> PersistError {
    PersistError::Decode {
        type_tag: type_tag.to_string(),
        detail: err.to_string(),
    }
}

async fn load_pass(
    session: &mut Session,
    pass: &Pass,
    store: &Store,
    mode: ExecutionMode,
    pacer: &mut Pacer,
    report: &mut LoadReport,
) -> Result<(), PersistError> {
    let (record, modules_text) = {
        let s = store.clone();
        let (record_path, modules_path) = (pass.record.clone(), pass.modules.clone());
        offload(mode, move || Ok((s.read(&record_path)?, s.read(&modules_path)?))).await?
    };
    let Some(record) = record else {
        let miss = match pass.group() {
            Some(group) => LoadMiss::MissingGroup(group),
            None => LoadMiss::MissingLevel(pass.label.clone()),
        };
        session
            .diagnostics
            .warn(format_args!("nothing saved for {} at {}", pass.label, pass.record.display()));
        report.misses.push(miss);
        return Ok(());
    };
    let modules = match modules_text {
        Some(text) => codec::decode_modules(&text)?,
        None => Vec::new(),
    };
    let pairs = codec::unpack(&record)?;
    report.passes.push(pass.label.clone());

    // Pre-load hooks on what is already live.
    let touched: Vec<ComponentKey> = session
        .graph
        .components()
        .filter(|(_, owner, b)| pass.qualifies(&session.graph, *owner, b.persistence()))
        .map(|(key, _, _)| key)
        .collect();
    for key in &touched {
        if let Some(b) = session.graph.behaviour_mut(*key) {
            b.on_pre_load();
            b.persistence_mut().is_loading = true;
        }
    }

    let restored = match rebuild_record(session, pass, &pairs, &modules, pacer, report).await {
        Ok(restored) => restored,
        Err(err) => {
            // Nothing gets post-load hooks, but no flag stays raised.
            for (_, b) in session.graph.components_mut() {
                b.persistence_mut().is_loading = false;
            }
            return Err(err);
        }
    };

    // Post-load hooks on everything touched or rebuilt by this pass.
    let mut seen = HashSet::new();
    let finished = touched
        .iter()
        .copied()
        .chain(restored.iter().copied())
        .filter(|key| seen.insert(*key));
    for key in finished.collect::<Vec<_>>() {
        if let Some(b) = session.graph.behaviour_mut(key) {
            b.persistence_mut().is_loading = false;
            b.on_post_load();
        }
    }

    session
        .diagnostics
        .info(format_args!("{}: {} component(s) restored", pass.label, restored.len()));
    Ok(())
}

/// Pass A then pass B for one record. Returns the restored components.
async fn rebuild_record(
    session: &mut Session,
    pass: &Pass,
    pairs: &[(String, String)],
    modules: &[String],
    pacer: &mut Pacer,
    report: &mut LoadReport,
) -> Result<Vec<ComponentKey>, PersistError> {
    // -----------------------------------------------------------------------
    // Pass A: nodes
    // -----------------------------------------------------------------------
    for (tag, json) in pairs.iter().filter(|(tag, _)| tag == NODE_TAG) {
        let mut envelopes: Vec<Envelope<NodeSnapshot>> =
            serde_json::from_str(json).map_err(|e| decode_error(tag, e))?;
        envelopes.sort_by_key(|e| e.state.loading_order);
        for envelope in envelopes {
            restore_node(session, pass, envelope, report);
            pacer.tick().await;
        }
    }

    // -----------------------------------------------------------------------
    // Pass A: components
    // -----------------------------------------------------------------------
    let mut restores: Vec<(ComponentKey, DecodedItem)> = Vec::new();
    for (tag, json) in pairs.iter().filter(|(tag, _)| tag != NODE_TAG) {
        let Some(entry) = session.descriptors.lookup(tag, modules).cloned() else {
            session
                .diagnostics
                .warn(format_args!("no descriptor for stored type {tag}; skipped"));
            report.misses.push(LoadMiss::UnknownType {
                type_tag: tag.clone(),
            });
            continue;
        };
        let items = entry.decode(json).map_err(|e| decode_error(tag, e))?;
        for item in items {
            pacer.tick().await;
            let Some(owner) = session.identities.resolve_node(&session.graph, &item.node_id) else {
                session.diagnostics.warn(format_args!(
                    "{tag} {} belongs to missing node {}; skipped",
                    item.component_id, item.node_id
                ));
                report.misses.push(LoadMiss::OrphanedComponent {
                    type_tag: tag.clone(),
                    component_id: item.component_id.clone(),
                    node_id: item.node_id.clone(),
                });
                continue;
            };

            let key = match session.identities.resolve_component(&session.graph, &item.component_id) {
                Some(key) => {
                    let same_type = session
                        .graph
                        .behaviour(key)
                        .is_some_and(|b| b.as_any().type_id() == entry.target);
                    if !same_type {
                        session.diagnostics.warn(format_args!(
                            "{} is bound to a different type than {tag}; skipped",
                            item.component_id
                        ));
                        report.misses.push(LoadMiss::TypeMismatch {
                            type_tag: tag.clone(),
                            component_id: item.component_id.clone(),
                        });
                        continue;
                    }
                    key
                }
                None => {
                    let mut fresh = entry.instantiate();
                    let persist = fresh.persistence_mut();
                    persist.component_id = Some(item.component_id.clone());
                    persist.node_id = Some(item.node_id.clone());
                    persist.is_loading = true;
                    let Some(key) = session.graph.add_component(owner, fresh) else {
                        continue;
                    };
                    session
                        .identities
                        .register(item.component_id.clone(), Handle::Component(key));
                    report.components_created += 1;
                    key
                }
            };

            if let Some(b) = session.graph.behaviour_mut(key) {
                let persist = b.persistence_mut();
                persist.group = item.group_id;
                persist.auto_sync = item.auto_sync;
                persist.is_on = true;
            }
            restores.push((key, item));
        }
    }

    // -----------------------------------------------------------------------
    // Pass B: fields and references
    // -----------------------------------------------------------------------
    for (key, item) in &restores {
        if let Some(b) = session.graph.behaviour_mut(*key) {
            if item.restore(b, &session.identities) {
                report.restored += 1;
            }
        }
        pacer.tick().await;
    }

    Ok(restores.into_iter().map(|(key, _)| key).collect())
}

/// Pass A for one node: resolve it, or rebuild it under its recorded parent.
fn restore_node(
    session: &mut Session,
    pass: &Pass,
    envelope: Envelope<NodeSnapshot>,
    report: &mut LoadReport,
) {
    let recorded_parent = session
        .identities
        .resolve_node_ref(&envelope.state.parent)
        .filter(|p| session.graph.contains_node(*p));

    let key = match session.identities.resolve_node(&session.graph, &envelope.node_id) {
        Some(key) => {
            if let Some(node) = session.graph.node_mut(key) {
                envelope.state.apply(node);
            }
            if let Some(parent) = recorded_parent {
                let current = session.graph.node(key).and_then(|n| n.parent());
                if current != Some(parent) {
                    if let Err(e) = session.graph.set_parent(key, Some(parent)) {
                        session.diagnostics.warn(format_args!("{e}"));
                    }
                }
            }
            key
        }
        None => {
            let fallback = match pass.filter {
                PassFilter::Subtree(root) => Some(root),
                PassFilter::Group(_) => None,
            };
            let mut node = envelope.state.spawn();
            node.stable_id = Some(envelope.node_id.clone());
            let key = session.graph.add_node(node, recorded_parent.or(fallback));
            session
                .identities
                .register(envelope.node_id.clone(), Handle::Node(key));
            report.nodes_created += 1;
            key
        }
    };

    if let Some(node) = session.graph.node_mut(key) {
        let marker = node.persistence.get_or_insert_with(PersistState::default);
        marker.component_id = Some(envelope.component_id);
        marker.node_id = Some(envelope.node_id);
        marker.group = envelope.group_id;
        marker.auto_sync = envelope.auto_sync;
        marker.is_on = true;
    }
}
