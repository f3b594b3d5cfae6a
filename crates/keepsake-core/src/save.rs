//! Save pipeline.
//!
//! For each pass: run pre-save hooks, snapshot persistent nodes sorted
//! parent-first, snapshot components one partition per descriptor type,
//! replace the pass's old files with the record and its modules file, then
//! run post-save hooks. Setup problems are caught for every pass before any
//! hook runs or any file is touched.

use crate::codec;
use crate::descriptor::{module_of, Envelope};
use crate::error::PersistError;
use crate::id::*;
use crate::node::{NodeSnapshot, NODE_TAG};
use crate::pacing::{offload, ExecutionMode, Pacer};
use crate::scope::{Pass, SaveScope};
use crate::session::Session;
use crate::storage::Store;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What one pass wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub label: String,
    /// `None` for level passes.
    pub group: Option<GroupId>,
    pub nodes: usize,
    pub components: usize,
    /// Size of the record file on disk.
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub passes: Vec<PassSummary>,
    /// Behaviour types that qualified but have no registered descriptor.
    pub skipped_types: Vec<&'static str>,
    /// Times the pipeline yielded to the scheduler.
    pub yields: usize,
}

impl SaveReport {
    pub fn total_components(&self) -> usize {
        self.passes.iter().map(|p| p.components).sum()
    }

    pub fn total_nodes(&self) -> usize {
        self.passes.iter().map(|p| p.nodes).sum()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

fn plan(session: &Session, scope: &SaveScope) -> Result<Vec<Pass>, PersistError> {
    let paths = session.paths();
    let ext = session.settings.file_extension.as_str();
    match scope {
        SaveScope::Groups(GroupSelector::All) => {
            let mut present = BTreeSet::new();
            for (_, node) in session.graph.nodes() {
                if let Some(marker) = &node.persistence {
                    present.insert(marker.group);
                }
            }
            for (_, _, behaviour) in session.graph.components() {
                present.insert(behaviour.persistence().group);
            }
            present
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

/// Fail if any entity covered by `passes` is missing its stable ids.
pub(crate) fn check_setup(session: &Session, passes: &[Pass]) -> Result<(), PersistError> {
    let graph = &session.graph;
    for (_, owner, behaviour) in graph.components() {
        let state = behaviour.persistence();
        if state.is_initialized() {
            continue;
        }
        if passes.iter().any(|pass| pass.qualifies(graph, owner, state)) {
            return Err(PersistError::Setup {
                type_name: behaviour.type_name(),
                reason: "no stable ids assigned; attach it through the session",
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub(crate) async fn run(
    session: &mut Session,
    scope: &SaveScope,
    mode: ExecutionMode,
) -> Result<SaveReport, PersistError> {
    let started = Instant::now();
    session.identities.rebuild(&mut session.graph);

    let passes = plan(session, scope)?;
    check_setup(session, &passes)?;

    let store = session.store();
    if matches!(scope, SaveScope::Groups(GroupSelector::All)) {
        let s = store.clone();
        offload(mode, move || s.purge_scene()).await?;
    }

    let mut pacer = Pacer::new(mode, session.settings.effective_batch_size());
    let mut report = SaveReport::default();
    for pass in &passes {
        let summary = save_pass(session, pass, &store, mode, &mut pacer, &mut report.skipped_types).await?;
        report.passes.push(summary);
    }
    report.yields = pacer.yields();

    log::info!(
        "saved {} pass(es), {} node(s), {} component(s) in {:.3?} ({} item(s), {} yield(s))",
        report.passes.len(),
        report.total_nodes(),
        report.total_components(),
        started.elapsed(),
        pacer.processed(),
        report.yields
    );
    Ok(report)
}

async fn save_pass(
    session: &mut Session,
    pass: &Pass,
    store: &Store,
    mode: ExecutionMode,
    pacer: &mut Pacer,
    skipped: &mut Vec<&'static str>,
) -> Result<PassSummary, PersistError> {
    let components: Vec<ComponentKey> = session
        .graph
        .components()
        .filter(|(_, owner, b)| pass.qualifies(&session.graph, *owner, b.persistence()))
        .map(|(key, _, _)| key)
        .collect();

    for key in &components {
        if let Some(b) = session.graph.behaviour_mut(*key) {
            b.on_pre_save();
            b.persistence_mut().is_saving = true;
        }
    }

    let written = write_pass(session, pass, store, mode, pacer, skipped, &components).await;

    // Flags clear on failure too; post-save hooks only run after a write.
    for key in &components {
        if let Some(b) = session.graph.behaviour_mut(*key) {
            b.persistence_mut().is_saving = false;
            if written.is_ok() {
                b.on_post_save();
            }
        }
    }
    let (nodes, components, bytes) = written?;

    session.diagnostics.info(format_args!(
        "{}: {nodes} node(s), {components} component(s), {bytes} bytes",
        pass.label
    ));
    Ok(PassSummary {
        label: pass.label.clone(),
        group: pass.group(),
        nodes,
        components,
        bytes,
    })
}

fn encode_error(type_tag: &str, err: serde_json::Error) -> PersistError {
    PersistError::Encode {
        type_tag: type_tag.to_string(),
        detail: err.to_string(),
    }
}

/// Snapshot and write one pass. Returns node count, component count and
/// record size.
async fn write_pass(
    session: &mut Session,
    pass: &Pass,
    store: &Store,
    mode: ExecutionMode,
    pacer: &mut Pacer,
    skipped: &mut Vec<&'static str>,
    components: &[ComponentKey],
) -> Result<(usize, usize, usize), PersistError> {
    // Nodes, parent-first.
    let node_keys: Vec<NodeKey> = session
        .graph
        .nodes()
        .filter(|(key, node)| {
            node.persistence
                .as_ref()
                .is_some_and(|marker| pass.qualifies(&session.graph, *key, marker))
        })
        .map(|(key, _)| key)
        .collect();
    let mut nodes: Vec<Envelope<NodeSnapshot>> = Vec::with_capacity(node_keys.len());
    for key in node_keys {
        let Some(marker) = session.graph.node(key).and_then(|n| n.persistence.as_ref()) else {
            continue;
        };
        let (Some(component_id), Some(node_id)) = (marker.component_id.clone(), marker.node_id.clone())
        else {
            continue;
        };
        let (group_id, auto_sync) = (marker.group, marker.auto_sync);
        if let Some(state) = NodeSnapshot::capture(&session.graph, &session.identities, key) {
            let envelope = Envelope {
                component_id,
                node_id,
                group_id,
                auto_sync,
                state,
            };
            codec::to_readable_value(&envelope).map_err(|e| encode_error(NODE_TAG, e))?;
            nodes.push(envelope);
        }
        pacer.tick().await;
    }
    nodes.sort_by_key(|e| e.state.loading_order);

    // Components, one partition per descriptor type.
    let mut partitions: BTreeMap<&'static str, Vec<ComponentKey>> = BTreeMap::new();
    for key in components {
        let Some(b) = session.graph.behaviour(*key) else {
            continue;
        };
        match session.descriptors.for_target(b.as_any().type_id()) {
            Some(entry) => partitions.entry(entry.tag).or_default().push(*key),
            None => {
                let name = b.type_name();
                if !skipped.contains(&name) {
                    session
                        .diagnostics
                        .warn(format_args!("no descriptor registered for {name}; not saved"));
                    skipped.push(name);
                }
            }
        }
    }

    let mut lines = Vec::with_capacity(partitions.len() + 1);
    let mut modules = BTreeSet::new();
    if !nodes.is_empty() {
        lines.push(codec::pack(NODE_TAG, &nodes)?);
        modules.insert(module_of(NODE_TAG).to_string());
    }
    let mut component_count = 0;
    for (tag, keys) in &partitions {
        let Some(entry) = session.descriptors.get(tag) else {
            continue;
        };
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let captured = entry
                .capture(&session.graph, &session.identities, *key)
                .map_err(|e| encode_error(tag, e))?;
            values.extend(captured);
            pacer.tick().await;
        }
        component_count += values.len();
        lines.push(codec::pack(tag, &values)?);
        modules.insert(entry.module.to_string());
    }

    let record = codec::encode_record(&lines);
    let modules: Vec<String> = modules.into_iter().collect();
    let modules_text = codec::encode_modules(&modules)?;
    let bytes = {
        let s = store.clone();
        let (record_path, modules_path) = (pass.record.clone(), pass.modules.clone());
        // Level files share one directory, so only group passes purge.
        let purge = pass.group().is_some().then(|| pass.dir.clone());
        offload(mode, move || {
            if let Some(dir) = purge {
                s.purge_files(&dir)?;
            }
            let written = s.write(&record_path, &record)?;
            s.write(&modules_path, &modules_text)?;
            Ok(written)
        })
        .await?
    };
    Ok((nodes.len(), component_count, bytes))
}
