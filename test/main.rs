// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use chrono::{DateTime, Duration, Utc};
use rulegist::{
    remote::{RemoteError, RemoteFile, RemoteRuleSet, RemoteStore, Result, Revision, MARKER_FILE},
    store::{RuleStore, RULES_DIR},
    sync::{Syncer, STAGING_DIR},
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
    rc::Rc,
};

/// In-memory remote store.
///
/// Clones share the same backing state, so one project can upload what
/// another project downloads. Every mutation advances a fake clock by one
/// minute, which keeps listing order deterministic.
#[derive(Debug, Clone)]
pub(crate) struct RemoteFixture {
    credential: bool,
    state: Rc<RefCell<FixtureState>>,
}

#[derive(Debug)]
struct FixtureState {
    rule_sets: Vec<RemoteRuleSet>,
    contents: HashMap<String, Vec<u8>>,
    broken_history: BTreeSet<String>,
    next_id: usize,
    clock: DateTime<Utc>,
}

impl FixtureState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::minutes(1);
        self.clock
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.rule_sets
            .iter()
            .position(|rule_set| rule_set.id == id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn put_file(&mut self, rule_set: usize, name: &str, content: &[u8]) {
        let id = self.rule_sets[rule_set].id.clone();
        let raw_url = format!("mem://{id}/{name}");
        self.contents.insert(raw_url.clone(), content.to_vec());
        self.rule_sets[rule_set].files.insert(
            name.to_string(),
            RemoteFile {
                filename: name.to_string(),
                kind: "text/plain".into(),
                raw_url,
                size: content.len() as u64,
                content: None,
            },
        );
    }

    fn push_revision(&mut self, rule_set: usize) {
        let now = self.tick();
        let revision = Revision {
            version: format!("rev{}", self.rule_sets[rule_set].history.len() + 1),
            commit_id: None,
            updated_at: Some(now),
        };
        self.rule_sets[rule_set].history.insert(0, revision);
        self.rule_sets[rule_set].updated_at = now;
    }
}

impl RemoteFixture {
    pub(crate) fn new() -> Self {
        let state = FixtureState {
            rule_sets: Vec::new(),
            contents: HashMap::new(),
            broken_history: BTreeSet::new(),
            next_id: 1,
            clock: "2025-01-01T00:00:00Z".parse().unwrap(),
        };

        Self {
            credential: true,
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// View of the same remote without a credential.
    pub(crate) fn anonymous(&self) -> Self {
        Self {
            credential: false,
            state: Rc::clone(&self.state),
        }
    }

    /// Build syncer for a project rooted at `work_dir`.
    pub(crate) fn syncer(&self, work_dir: impl AsRef<Path>) -> Syncer<Self> {
        let work_dir = work_dir.as_ref();
        Syncer::new(
            self.clone(),
            RuleStore::open(work_dir.join(RULES_DIR)),
            work_dir.join(STAGING_DIR),
        )
    }

    /// Add rule set that lacks the metadata marker.
    pub(crate) fn insert_unmanaged(&self, title: &str) -> String {
        let mut files = BTreeMap::new();
        files.insert("notes.txt".to_string(), "hello".to_string());
        self.create(title, &files, true).unwrap()
    }

    pub(crate) fn rule_set(&self, id: &str) -> RemoteRuleSet {
        let state = self.state.borrow();
        state.rule_sets[state.position(id).unwrap()].clone()
    }

    pub(crate) fn file_names(&self, id: &str) -> Vec<String> {
        self.rule_set(id).files.into_keys().collect()
    }

    pub(crate) fn raw(&self, id: &str, name: &str) -> Vec<u8> {
        self.state.borrow().contents[&format!("mem://{id}/{name}")].clone()
    }

    /// Replace content behind a file without touching the manifest.
    pub(crate) fn tamper(&self, id: &str, name: &str, content: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.contents.insert(format!("mem://{id}/{name}"), content.to_vec());
    }

    /// Add or replace file without recording a revision.
    pub(crate) fn put(&self, id: &str, name: &str, content: &[u8]) {
        let mut state = self.state.borrow_mut();
        let index = state.position(id).unwrap();
        state.put_file(index, name, content);
    }

    pub(crate) fn drop_file(&self, id: &str, name: &str) {
        let mut state = self.state.borrow_mut();
        let index = state.position(id).unwrap();
        state.rule_sets[index].files.remove(name);
    }

    /// Change title behind the tool's back, e.g., through the web interface.
    pub(crate) fn retitle(&self, id: &str, title: &str) {
        let mut state = self.state.borrow_mut();
        let index = state.position(id).unwrap();
        state.rule_sets[index].description = Some(title.to_string());
    }

    pub(crate) fn break_history(&self, id: &str) {
        self.state.borrow_mut().broken_history.insert(id.to_string());
    }

    fn require_credential(&self) -> Result<()> {
        match self.credential {
            true => Ok(()),
            false => Err(RemoteError::MissingToken),
        }
    }
}

impl RemoteStore for RemoteFixture {
    fn has_credential(&self) -> bool {
        self.credential
    }

    fn create(&self, title: &str, files: &BTreeMap<String, String>, public: bool) -> Result<String> {
        self.require_credential()?;
        let mut state = self.state.borrow_mut();
        let id = format!("gist{:04}", state.next_id);
        state.next_id += 1;

        state.rule_sets.push(RemoteRuleSet {
            id: id.clone(),
            description: Some(title.to_string()),
            public,
            ..Default::default()
        });
        let index = state.rule_sets.len() - 1;
        for (name, content) in files {
            state.put_file(index, name, content.as_bytes());
        }
        state.push_revision(index);

        Ok(id)
    }

    fn update_wholesale(&self, id: &str, files: &BTreeMap<String, Option<String>>) -> Result<String> {
        self.require_credential()?;
        let mut state = self.state.borrow_mut();
        let index = state.position(id)?;
        for (name, content) in files {
            match content {
                Some(content) => state.put_file(index, name, content.as_bytes()),
                None => {
                    state.rule_sets[index].files.remove(name);
                }
            }
        }
        state.push_revision(index);

        Ok(id.to_string())
    }

    fn fetch_by_id(&self, id: &str) -> Result<RemoteRuleSet> {
        let state = self.state.borrow();
        let rule_set = state.rule_sets[state.position(id)?].clone();
        if !rule_set.public && !self.credential {
            return Err(RemoteError::AuthRequired(id.to_string()));
        }

        Ok(rule_set)
    }

    fn list_mine_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteRuleSet>> {
        self.require_credential()?;
        let listing = self
            .state
            .borrow()
            .rule_sets
            .iter()
            .filter(|rule_set| since.is_none_or(|since| rule_set.updated_at >= since))
            .cloned()
            .collect();

        Ok(listing)
    }

    fn fetch_with_history(&self, id: &str) -> Result<RemoteRuleSet> {
        if self.state.borrow().broken_history.contains(id) {
            return Err(RemoteError::Status {
                status: 500,
                body: "history unavailable".into(),
            });
        }

        self.fetch_by_id(id)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.require_credential()?;
        let mut state = self.state.borrow_mut();
        let index = state.position(id)?;
        state.rule_sets.remove(index);

        Ok(())
    }

    fn fetch_raw(&self, url: &str) -> Result<Vec<u8>> {
        self.state
            .borrow()
            .contents
            .get(url)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(url.to_string()))
    }
}

/// Seed rule files under rules root of `work_dir`.
pub(crate) fn seed_rules(work_dir: impl AsRef<Path>, files: &[(&str, &str)]) -> anyhow::Result<()> {
    let store = RuleStore::open(work_dir.as_ref().join(RULES_DIR));
    for (path, contents) in files {
        store.save(path, contents)?;
    }

    Ok(())
}

/// Marker content of rule set, for tests that corrupt it.
pub(crate) fn set_marker(remote: &RemoteFixture, id: &str, content: &str) {
    remote.tamper(id, MARKER_FILE, content.as_bytes());
}
