//! Three-way merge of dataset changes, resumable across invocations.
//!
//! Each side's changes are diffed against the merge base. Every primary
//! key either side touched becomes an [`Entry`]; entries both sides changed
//! differently are conflicts. A merge without conflicts commits at once;
//! otherwise its state is persisted until every conflict is resolved and
//! `merge --continue` builds the merge commit.
//!
//! Structural disagreements (a dataset added on both sides, deleted on one
//! and changed on the other, or meta items changed differently) are not
//! resolvable per feature and stop the merge before any state is written.

pub mod index;
pub mod state;

use std::collections::{BTreeMap, BTreeSet};

use git2::{ErrorCode, FileMode, Oid};
use serde::Serialize;
use tracing::{debug, info};

pub use index::{ConflictKey, ConflictKind, Entry, MergeIndex, Resolution};
pub use state::{MergeState, RepoState};

use crate::diff::{DatasetDiff, Delta, MetaChange, diff_datasets};
use crate::error::{Error, Result};
use crate::model::{Feature, PrimaryKey};
use crate::repo::RepoContext;
use crate::structure::{
    Dataset, RepositoryStructure, TreeWriter, head_commit_id, stage_dataset_diff,
};

/// Options for starting a merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Always create a merge commit, even when fast-forwarding is possible.
    pub no_ff: bool,
    pub message: Option<String>,
}

/// Outcome of `merge` or `merge --continue`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub ours: String,
    pub theirs: String,
    pub ancestor: Option<String>,
    /// The new `HEAD`, unless the merge stopped on conflicts.
    pub commit: Option<String>,
    pub no_op: bool,
    pub fast_forward: bool,
    pub message: String,
    pub conflicts: Option<BTreeMap<String, BTreeMap<ConflictKind, usize>>>,
}

impl MergeResult {
    fn new(ours: Oid, theirs: Oid) -> Self {
        Self {
            ours: ours.to_string(),
            theirs: theirs.to_string(),
            ancestor: None,
            commit: None,
            no_op: false,
            fast_forward: false,
            message: String::new(),
            conflicts: None,
        }
    }

    /// JSON envelope for the CLI.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "strata.merge/v1": self })
    }
}

/// Dataset-level decisions plus the feature index.
#[derive(Debug, Default)]
struct MergePlan {
    index: MergeIndex,
    /// Meta changes from theirs to apply onto ours.
    meta: BTreeMap<String, BTreeMap<String, MetaChange>>,
    /// Datasets to take whole from theirs.
    take: Vec<(String, Oid)>,
    /// Datasets theirs deleted and ours left alone.
    drop: Vec<String>,
}

fn structural(path: &str, what: &str) -> Error {
    Error::InvalidOperation(format!("Cannot merge {path}: {what}"))
}

fn by_path<'r>(structure: &RepositoryStructure<'r>) -> Result<BTreeMap<String, Dataset<'r>>> {
    Ok(structure
        .datasets()?
        .into_iter()
        .map(|d| (d.path().to_string(), d))
        .collect())
}

fn plan(
    ancestor: &RepositoryStructure<'_>,
    ours: &RepositoryStructure<'_>,
    theirs: &RepositoryStructure<'_>,
) -> Result<MergePlan> {
    let (a, o, t) = (by_path(ancestor)?, by_path(ours)?, by_path(theirs)?);
    let paths: BTreeSet<&String> = a.keys().chain(o.keys()).chain(t.keys()).collect();

    let mut plan = MergePlan::default();
    for path in paths {
        match (a.get(path), o.get(path), t.get(path)) {
            (_, Some(o), Some(t)) if o.tree_id() == t.tree_id() => {}
            (None, None, Some(t)) => {
                let oid = t.tree_id().ok_or_else(|| Error::not_found(format!("tree of {path}")))?;
                plan.take.push((path.clone(), oid));
            }
            (None, Some(_), Some(_)) => return Err(structural(path, "added on both sides")),
            (Some(a), Some(o), None) => {
                if o.tree_id() != a.tree_id() {
                    return Err(structural(path, "deleted by theirs, changed by ours"));
                }
                plan.drop.push(path.clone());
            }
            (Some(a), None, Some(t)) => {
                if t.tree_id() != a.tree_id() {
                    return Err(structural(path, "deleted by ours, changed by theirs"));
                }
            }
            (Some(a), Some(o), Some(t)) => merge_dataset(a, o, t, &mut plan)?,
            _ => {}
        }
    }
    debug!(
        entries = plan.index.entries.len(),
        conflicts = plan.index.conflicts.len(),
        taken = plan.take.len(),
        dropped = plan.drop.len(),
        "planned merge"
    );
    Ok(plan)
}

fn merge_dataset(
    a: &Dataset<'_>,
    o: &Dataset<'_>,
    t: &Dataset<'_>,
    plan: &mut MergePlan,
) -> Result<()> {
    let path = o.path();
    if t.tree_id() == a.tree_id() {
        return Ok(());
    }
    if o.tree_id() == a.tree_id() {
        let oid = t.tree_id().ok_or_else(|| Error::not_found(format!("tree of {path}")))?;
        plan.take.push((path.to_string(), oid));
        return Ok(());
    }
    if o.version() != t.version() || a.version() != o.version() {
        return Err(structural(path, "dataset version differs between branches"));
    }
    if o.primary_key() != t.primary_key() || a.primary_key() != o.primary_key() {
        return Err(structural(path, "primary key differs between branches"));
    }

    let (am, om, tm) = (a.meta_items()?, o.meta_items()?, t.meta_items()?);
    let names: BTreeSet<&String> = am.keys().chain(om.keys()).chain(tm.keys()).collect();
    for name in names {
        let (av, ov, tv) = (am.get(name), om.get(name), tm.get(name));
        if ov == tv || tv == av {
            continue;
        }
        if ov != av {
            return Err(structural(path, &format!("meta item '{name}' changed on both sides")));
        }
        plan.meta.entry(path.to_string()).or_default().insert(
            name.clone(),
            MetaChange {
                old: ov.cloned(),
                new: tv.cloned(),
            },
        );
    }

    let mut touched = BTreeSet::new();
    for diff in [diff_datasets(Some(a), Some(o))?, diff_datasets(Some(a), Some(t))?] {
        for delta in diff.feature.values() {
            touched.extend(delta.old_key().cloned());
            touched.extend(delta.new_key().cloned());
        }
    }
    if touched.is_empty() {
        return Ok(());
    }
    let mut av = a.get_features(&touched)?;
    let mut ov = o.get_features(&touched)?;
    let mut tv = t.get_features(&touched)?;
    plan.index
        .primary_keys
        .insert(path.to_string(), o.primary_key().to_string());
    for key in touched {
        plan.index.push(Entry {
            dataset: path.to_string(),
            ancestor: av.remove(&key),
            ours: ov.remove(&key),
            theirs: tv.remove(&key),
            key,
        });
    }
    Ok(())
}

/// Apply the plan and the final feature values onto `ours`.
fn build_tree(
    ours: &RepositoryStructure<'_>,
    plan: &MergePlan,
    values: &BTreeMap<String, BTreeMap<PrimaryKey, Option<Feature>>>,
) -> Result<Oid> {
    let mut writer = TreeWriter::new(ours.repo());
    for (path, oid) in &plan.take {
        writer.upsert(path.clone(), *oid, FileMode::Tree);
    }
    for path in &plan.drop {
        writer.remove(path.clone());
    }

    let paths: BTreeSet<&String> = plan.meta.keys().chain(values.keys()).collect();
    for path in paths {
        let dataset = ours.get(path)?;
        let mut diff = DatasetDiff::new();
        if let Some(meta) = plan.meta.get(path) {
            diff.meta.clone_from(meta);
        }
        if let Some(values) = values.get(path) {
            let current = dataset.get_features(values.keys())?;
            for (key, value) in values {
                let delta = match (current.get(key), value) {
                    (None, None) => continue,
                    (Some(old), Some(new)) if old == new => continue,
                    (Some(old), None) => Delta::Delete {
                        key: key.clone(),
                        value: old.clone(),
                    },
                    (None, Some(new)) => Delta::Insert {
                        key: key.clone(),
                        value: new.clone(),
                    },
                    (Some(old), Some(new)) => Delta::Update {
                        old_key: key.clone(),
                        new_key: key.clone(),
                        old_value: old.clone(),
                        new_value: new.clone(),
                    },
                };
                diff.feature.insert(key.clone(), delta);
            }
        }
        stage_dataset_diff(&dataset, &diff, &mut writer)?;
    }
    writer.write(ours.tree())
}

fn commit_merge(
    ctx: &RepoContext,
    ours: &RepositoryStructure<'_>,
    theirs: &RepositoryStructure<'_>,
    tree: Oid,
    message: &str,
) -> Result<Oid> {
    let repo = ctx.repo();
    let signature = ctx.signature()?;
    let tree = repo.find_tree(tree)?;
    let parents: Vec<&git2::Commit<'_>> = ours
        .git_commit()
        .into_iter()
        .chain(theirs.git_commit())
        .collect();
    let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    info!(commit = %oid, "created merge commit");
    Ok(oid)
}

fn require_clean_working_copy(ctx: &RepoContext, head: &RepositoryStructure<'_>) -> Result<()> {
    let Some(wc) = ctx.working_copy()? else {
        return Ok(());
    };
    wc.assert_tree_match(head.tree_id())?;
    let mut diff = wc.diff_to_structure(head)?;
    diff.prune();
    if !diff.is_empty() {
        return Err(Error::InvalidOperation(
            "You have uncommitted changes in your working copy. Commit or discard first".to_string(),
        ));
    }
    Ok(())
}

fn reset_working_copy(ctx: &RepoContext) -> Result<()> {
    if let Some(mut wc) = ctx.working_copy()? {
        let head = RepositoryStructure::lookup(ctx.repo(), "HEAD")?;
        wc.reset(&head, false)?;
    }
    Ok(())
}

fn structure_at(ctx: &RepoContext, oid: Oid) -> Result<RepositoryStructure<'_>> {
    RepositoryStructure::from_commit(ctx.repo(), ctx.repo().find_commit(oid)?)
}

/// Merge `theirs` into the current branch.
///
/// # Errors
///
/// Returns `InvalidOperation` while another merge is in progress, when the
/// working copy has uncommitted changes, or on a structural conflict;
/// `NotFound` for an unknown revision.
pub fn merge(ctx: &RepoContext, theirs: &str, options: &MergeOptions) -> Result<MergeResult> {
    if RepoState::load(ctx)? == RepoState::Merging {
        return Err(Error::InvalidOperation(
            "Cannot start a merge while merging".to_string(),
        ));
    }
    let repo = ctx.repo();
    let ours_id = head_commit_id(repo)?
        .ok_or_else(|| Error::InvalidOperation("Cannot merge into an empty branch".to_string()))?;
    let theirs_id = repo
        .revparse_single(theirs)
        .map_err(|e| match e.code() {
            ErrorCode::NotFound => Error::not_found(format!("revision '{theirs}'")),
            _ => e.into(),
        })?
        .peel_to_commit()?
        .id();

    let ours = structure_at(ctx, ours_id)?;
    require_clean_working_copy(ctx, &ours)?;

    let mut result = MergeResult::new(ours_id, theirs_id);
    if ours_id == theirs_id || repo.graph_descendant_of(ours_id, theirs_id)? {
        info!(theirs, "already up to date");
        result.no_op = true;
        return Ok(result);
    }
    let ancestor_id = repo.merge_base(ours_id, theirs_id).map_err(|e| match e.code() {
        ErrorCode::NotFound => {
            Error::InvalidOperation(format!("No common ancestor with '{theirs}'"))
        }
        _ => e.into(),
    })?;
    result.ancestor = Some(ancestor_id.to_string());

    if ancestor_id == ours_id && !options.no_ff {
        repo.head()?
            .set_target(theirs_id, &format!("strata: fast-forward to {theirs}"))?;
        info!(theirs, commit = %theirs_id, "fast-forwarded");
        result.fast_forward = true;
        result.commit = Some(theirs_id.to_string());
        reset_working_copy(ctx)?;
        return Ok(result);
    }

    result.message = options
        .message
        .clone()
        .unwrap_or_else(|| format!("Merge '{theirs}'"));
    let ancestor = structure_at(ctx, ancestor_id)?;
    let theirs_structure = structure_at(ctx, theirs_id)?;
    let plan = plan(&ancestor, &ours, &theirs_structure)?;

    if plan.index.has_conflicts() {
        let state = MergeState {
            ancestor: ancestor_id.to_string(),
            ours: ours_id.to_string(),
            theirs: theirs_id.to_string(),
            theirs_name: theirs.to_string(),
            message: result.message.clone(),
            index: plan.index,
        };
        state.save(ctx)?;
        info!(
            theirs,
            conflicts = state.index.conflicts.len(),
            "merge stopped on conflicts"
        );
        result.conflicts = Some(state.index.counts());
        return Ok(result);
    }

    let values = plan.index.merged_values()?;
    let tree = build_tree(&ours, &plan, &values)?;
    let oid = commit_merge(ctx, &ours, &theirs_structure, tree, &result.message)?;
    result.commit = Some(oid.to_string());
    reset_working_copy(ctx)?;
    Ok(result)
}

/// Finish the in-progress merge once every conflict is resolved.
///
/// # Errors
///
/// Returns `InvalidOperation` if no merge is in progress, `HEAD` moved, or
/// conflicts remain unresolved.
pub fn continue_merge(ctx: &RepoContext) -> Result<MergeResult> {
    let state = MergeState::require(ctx)?;
    let (ancestor_id, ours_id, theirs_id) = state.heads()?;
    if head_commit_id(ctx.repo())? != Some(ours_id) {
        return Err(Error::InvalidOperation(
            "HEAD has moved since the merge started; abort it and merge again".to_string(),
        ));
    }
    let values = state.index.merged_values()?;

    let ancestor = structure_at(ctx, ancestor_id)?;
    let ours = structure_at(ctx, ours_id)?;
    let theirs = structure_at(ctx, theirs_id)?;
    let plan = plan(&ancestor, &ours, &theirs)?;
    let tree = build_tree(&ours, &plan, &values)?;
    let oid = commit_merge(ctx, &ours, &theirs, tree, &state.message)?;
    MergeState::remove(ctx)?;
    reset_working_copy(ctx)?;

    let mut result = MergeResult::new(ours_id, theirs_id);
    result.ancestor = Some(state.ancestor);
    result.commit = Some(oid.to_string());
    result.message = state.message;
    Ok(result)
}

/// Discard the in-progress merge.
///
/// # Errors
///
/// Returns `InvalidOperation` if no merge is in progress.
pub fn abort(ctx: &RepoContext) -> Result<MergeState> {
    let state = MergeState::require(ctx)?;
    MergeState::remove(ctx)?;
    info!(theirs = %state.theirs_name, "merge aborted");
    Ok(state)
}

/// Resolve one conflict by id, returning how many remain.
///
/// # Errors
///
/// Returns `InvalidOperation` if no merge is in progress and `NotFound`
/// for an unknown conflict id.
pub fn resolve(ctx: &RepoContext, id: &str, resolution: &Resolution) -> Result<usize> {
    let mut state = MergeState::require(ctx)?;
    let key = state.index.find(id)?;
    state.index.resolve(key, resolution)?;
    state.save(ctx)?;
    let remaining = state.index.unresolved().count();
    info!(conflict = id, remaining, "resolved conflict");
    Ok(remaining)
}

/// JSON listing of unresolved conflicts: grouped dataset → kind → ids, or
/// a flat list of ids.
#[must_use]
pub fn conflicts_json(index: &MergeIndex, flat: bool) -> serde_json::Value {
    if flat {
        serde_json::json!({ "strata.conflicts/v1": index.flat_listing() })
    } else {
        serde_json::json!({ "strata.conflicts/v1": index.listing() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::structure::DatasetVersion;
    use crate::test_support::{Fixture, POINTS_TABLE, point};

    fn name(feature: &Feature) -> &str {
        match &feature["name"] {
            Value::Text(s) => s,
            _ => "",
        }
    }

    fn renamed(fid: i64, to: &str) -> Feature {
        let mut f = point(fid);
        f.insert("name".into(), Value::Text(to.into()));
        f
    }

    fn head_feature(fx: &Fixture, fid: i64) -> Option<Feature> {
        let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
        head.get(POINTS_TABLE)
            .unwrap()
            .get_features([&PrimaryKey::Int(fid)])
            .unwrap()
            .remove(&PrimaryKey::Int(fid))
    }

    /// Two branches off a 10-point import with four true collisions.
    fn diverged() -> Fixture {
        diverged_as(DatasetVersion::DEFAULT)
    }

    fn diverged_as(version: DatasetVersion) -> Fixture {
        let fx = Fixture::new();
        fx.import_points_as(10, version);
        fx.branch("theirs");
        fx.commit_points(
            "theirs",
            &[
                renamed(1, "theirs_version"),
                renamed(2, "ours_theirs_version"),
                renamed(3, "theirs_version"),
                renamed(4, "theirs_version"),
                renamed(5, "theirs_version"),
                renamed(98001, "insert_theirs"),
            ],
            &[],
        );
        fx.commit_points(
            "main",
            &[
                renamed(2, "ours_theirs_version"),
                renamed(3, "ours_version"),
                renamed(4, "ours_version"),
                renamed(5, "ours_version"),
                renamed(6, "ours_version"),
                renamed(98001, "insert_ours"),
            ],
            &[],
        );
        fx
    }

    #[test]
    fn test_merge_disjoint_edits() {
        let fx = Fixture::new();
        fx.import_points(5);
        fx.branch("theirs");
        fx.commit_points("theirs", &[renamed(1, "t")], &[4]);
        fx.commit_points("main", &[renamed(2, "o")], &[]);
        let ctx = fx.context();

        let result = merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
        assert!(result.conflicts.is_none());
        assert!(!result.fast_forward);
        let commit = fx.repo.find_commit(Oid::from_str(result.commit.as_deref().unwrap()).unwrap()).unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert_eq!(name(&head_feature(&fx, 1).unwrap()), "t");
        assert_eq!(name(&head_feature(&fx, 2).unwrap()), "o");
        assert!(head_feature(&fx, 4).is_none());
        assert_eq!(head_feature(&fx, 3).unwrap(), point(3));
    }

    #[test]
    fn test_merge_same_change_both_sides() {
        let fx = Fixture::new();
        fx.import_points(3);
        fx.branch("theirs");
        fx.commit_points("theirs", &[renamed(1, "same")], &[]);
        fx.commit_points("main", &[renamed(1, "same")], &[]);
        let result = merge(&fx.context(), "theirs", &MergeOptions::default()).unwrap();
        assert!(result.conflicts.is_none());
        assert_eq!(name(&head_feature(&fx, 1).unwrap()), "same");
    }

    #[test]
    fn test_up_to_date_and_fast_forward() {
        let fx = Fixture::new();
        fx.import_points(3);
        fx.branch("theirs");
        let ctx = fx.context();
        assert!(merge(&ctx, "theirs", &MergeOptions::default()).unwrap().no_op);

        let ahead = fx.commit_points("theirs", &[renamed(1, "ff")], &[]);
        let result = merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
        assert!(result.fast_forward);
        assert_eq!(head_commit_id(&fx.repo).unwrap(), Some(ahead));
        assert_eq!(ctx.branch().as_deref(), Some("main"));
    }

    #[test]
    fn test_no_ff_creates_merge_commit() {
        let fx = Fixture::new();
        fx.import_points(3);
        fx.branch("theirs");
        let ahead = fx.commit_points("theirs", &[renamed(1, "ff")], &[]);
        let options = MergeOptions {
            no_ff: true,
            message: Some("Merge it".into()),
        };
        let result = merge(&fx.context(), "theirs", &options).unwrap();
        assert!(!result.fast_forward);
        let head = head_commit_id(&fx.repo).unwrap().unwrap();
        assert_ne!(head, ahead);
        let commit = fx.repo.find_commit(head).unwrap();
        assert_eq!(commit.message(), Some("Merge it"));
        assert_eq!(commit.parent_id(1).unwrap(), ahead);
        assert_eq!(name(&head_feature(&fx, 1).unwrap()), "ff");
    }

    #[test]
    fn test_conflicts_resolved_one_mode_each() {
        let fx = diverged();
        let ctx = fx.context();
        let result = merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
        assert!(result.commit.is_none());
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Merging);

        let state = MergeState::require(&ctx).unwrap();
        assert_eq!(
            state.index.flat_listing(),
            vec![
                "points:fid=98001",
                "points:fid=3",
                "points:fid=4",
                "points:fid=5",
            ]
        );
        let add_add = &state.index.entries[state.index.find("points:fid=98001").unwrap()];
        assert!(add_add.ancestor.is_none());
        assert_eq!(name(add_add.ours.as_ref().unwrap()), "insert_ours");
        assert_eq!(name(add_add.theirs.as_ref().unwrap()), "insert_theirs");
        let counts = result.conflicts.unwrap();
        assert_eq!(counts[POINTS_TABLE][&ConflictKind::EditEdit], 3);

        let steps = [
            ("points:fid=98001", Resolution::Ancestor, 3),
            ("points:fid=3", Resolution::Ours, 2),
            ("points:fid=4", Resolution::Theirs, 1),
        ];
        for (id, resolution, remaining) in steps {
            assert!(matches!(
                continue_merge(&ctx),
                Err(Error::InvalidOperation(_))
            ));
            assert_eq!(resolve(&ctx, id, &resolution).unwrap(), remaining);
        }
        assert!(matches!(
            commit_blocked(&ctx),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(resolve(&ctx, "points:fid=5", &Resolution::Delete).unwrap(), 0);

        let result = continue_merge(&ctx).unwrap();
        assert!(result.commit.is_some());
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Normal);

        assert!(head_feature(&fx, 98001).is_none());
        assert_eq!(name(&head_feature(&fx, 3).unwrap()), "ours_version");
        assert_eq!(name(&head_feature(&fx, 4).unwrap()), "theirs_version");
        assert!(head_feature(&fx, 5).is_none());
        assert_eq!(name(&head_feature(&fx, 1).unwrap()), "theirs_version");
        assert_eq!(name(&head_feature(&fx, 2).unwrap()), "ours_theirs_version");
        assert_eq!(name(&head_feature(&fx, 6).unwrap()), "ours_version");
        assert_eq!(head_feature(&fx, 7).unwrap(), point(7));
    }

    fn commit_blocked(ctx: &RepoContext) -> Result<crate::commit::CommitResult> {
        crate::commit::commit(ctx, "too early", true)
    }

    #[test]
    fn test_conflicts_on_older_layouts() {
        for version in [DatasetVersion::V0_0_1, DatasetVersion::V0_1_0] {
            let fx = diverged_as(version);
            let ctx = fx.context();
            let result = merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
            assert!(result.commit.is_none(), "{version}");
            assert_eq!(result.conflicts.unwrap()[POINTS_TABLE][&ConflictKind::EditEdit], 3);

            for id in ["points:fid=98001", "points:fid=3", "points:fid=4"] {
                resolve(&ctx, id, &Resolution::Theirs).unwrap();
            }
            assert_eq!(resolve(&ctx, "points:fid=5", &Resolution::Ours).unwrap(), 0);
            continue_merge(&ctx).unwrap();

            let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
            assert_eq!(head.get(POINTS_TABLE).unwrap().version(), version);
            assert_eq!(name(&head_feature(&fx, 98001).unwrap()), "insert_theirs");
            assert_eq!(name(&head_feature(&fx, 3).unwrap()), "theirs_version");
            assert_eq!(name(&head_feature(&fx, 5).unwrap()), "ours_version");
            assert_eq!(name(&head_feature(&fx, 1).unwrap()), "theirs_version");
            assert_eq!(name(&head_feature(&fx, 6).unwrap()), "ours_version");
            assert_eq!(head_feature(&fx, 7).unwrap(), point(7));
        }
    }

    #[test]
    fn test_add_add_split_into_two_features() {
        let fx = diverged();
        let ctx = fx.context();
        merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
        for id in ["points:fid=3", "points:fid=4", "points:fid=5"] {
            resolve(&ctx, id, &Resolution::Ours).unwrap();
        }
        let split = vec![renamed(98001, "insert_ours"), renamed(98002, "insert_theirs")];
        resolve(&ctx, "points:fid=98001", &Resolution::Features(split)).unwrap();
        continue_merge(&ctx).unwrap();

        assert_eq!(name(&head_feature(&fx, 98001).unwrap()), "insert_ours");
        let second = head_feature(&fx, 98002).unwrap();
        assert_eq!(name(&second), "insert_theirs");
        assert_eq!(second["fid"], Value::Integer(98002));
    }

    #[test]
    fn test_abort_discards_state() {
        let fx = diverged();
        let ctx = fx.context();
        let before = head_commit_id(&fx.repo).unwrap();
        merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
        assert!(matches!(
            merge(&ctx, "theirs", &MergeOptions::default()),
            Err(Error::InvalidOperation(_))
        ));
        let state = abort(&ctx).unwrap();
        assert_eq!(state.theirs_name, "theirs");
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Normal);
        assert_eq!(head_commit_id(&fx.repo).unwrap(), before);
        assert!(matches!(abort(&ctx), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_meta_conflict_is_structural() {
        let fx = Fixture::new();
        fx.import_points(2);
        fx.branch("theirs");
        fx.set_meta("theirs", "title", serde_json::json!("Theirs"));
        fx.set_meta("main", "title", serde_json::json!("Ours"));
        let ctx = fx.context();
        let err = merge(&ctx, "theirs", &MergeOptions::default()).unwrap_err();
        assert!(err.to_string().contains("meta item 'title'"));
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Normal);
    }

    #[test]
    fn test_theirs_meta_change_is_applied() {
        let fx = Fixture::new();
        fx.import_points(2);
        fx.branch("theirs");
        fx.set_meta("theirs", "title", serde_json::json!("Renamed"));
        fx.commit_points("main", &[renamed(1, "o")], &[]);
        merge(&fx.context(), "theirs", &MergeOptions::default()).unwrap();
        let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
        let ds = head.get(POINTS_TABLE).unwrap();
        assert_eq!(ds.get_meta_item("title").unwrap(), "Renamed");
        assert_eq!(name(&ds.get_feature(&PrimaryKey::Int(1)).unwrap()), "o");
    }

    #[test]
    fn test_conflicts_json_shapes() {
        let fx = diverged();
        let ctx = fx.context();
        merge(&ctx, "theirs", &MergeOptions::default()).unwrap();
        let index = MergeState::require(&ctx).unwrap().index;
        let grouped = conflicts_json(&index, false);
        assert_eq!(
            grouped["strata.conflicts/v1"]["points"]["add/add"][0],
            "points:fid=98001"
        );
        let flat = conflicts_json(&index, true);
        assert_eq!(flat["strata.conflicts/v1"].as_array().unwrap().len(), 4);
    }
}
