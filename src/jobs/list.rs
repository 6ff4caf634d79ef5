use serde::{Deserialize, Serialize};

use super::JobSet;
use super::tables::known_job_names;
use crate::settings::ColorDepth;

/// One user-maintained record of the manual job list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobListEntry {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub samples: Option<u32>,
    #[serde(default)]
    pub color_depth: Option<ColorDepth>,
}

impl JobListEntry {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            suffix: None,
            samples: None,
            color_depth: None,
        }
    }
}

/// The persisted, ordered manual job list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(transparent)]
pub struct JobList {
    pub entries: Vec<JobListEntry>,
}

/// Entries hidden by [`JobList::shorten`], with the positions they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct JobListSnapshot {
    hidden: Vec<(usize, JobListEntry)>,
}

impl JobList {
    /// The long list: every known job, all disabled.
    pub fn with_known_jobs() -> Self {
        Self {
            entries: known_job_names()
                .into_iter()
                .map(|n| JobListEntry::new(n, false))
                .collect(),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&JobListEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &JobListEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    /// Enable an entry for every detected job, appending names the list
    /// does not know yet. Existing suffix/samples/depth are left alone.
    pub fn upsert_detected(&mut self, jobs: &JobSet) {
        for job in jobs.iter() {
            let name = job.display_name();
            match self.entries.iter_mut().find(|e| e.name == name) {
                Some(e) => e.enabled = true,
                None => self.entries.push(JobListEntry::new(name, true)),
            }
        }
    }

    /// Collapse to the enabled entries. The returned snapshot restores the
    /// hidden ones with [`JobList::lengthen`].
    pub fn shorten(&mut self) -> JobListSnapshot {
        let mut hidden = Vec::new();
        let mut kept = Vec::new();
        for (i, e) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if e.enabled {
                kept.push(e);
            } else {
                hidden.push((i, e));
            }
        }
        self.entries = kept;
        JobListSnapshot { hidden }
    }

    /// Put hidden entries back at their original positions. Entries the user
    /// re-added while the list was short win over the snapshot.
    pub fn lengthen(&mut self, snapshot: JobListSnapshot) {
        for (i, e) in snapshot.hidden {
            if self.entries.iter().any(|x| x.name == e.name) {
                continue;
            }
            let at = i.min(self.entries.len());
            self.entries.insert(at, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> JobList {
        let mut l = JobList::with_known_jobs();
        for e in &mut l.entries {
            if e.name == "Roughness" || e.name == "Normal" {
                e.enabled = true;
                e.samples = Some(4);
            }
        }
        l
    }

    #[test]
    fn shorten_then_lengthen_restores_the_exact_list() {
        let original = list();
        let mut l = original.clone();
        let snap = l.shorten();
        let names: Vec<&str> = l.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Roughness", "Normal"]);
        l.lengthen(snap);
        assert_eq!(l, original);
    }

    #[test]
    fn upsert_enables_known_and_appends_new_names() {
        let mut l = JobList::with_known_jobs();
        let mut jobs = JobSet::default();
        jobs.insert(crate::jobs::Job::new("Metallic"));
        jobs.insert(crate::jobs::Job::vertex_color("Col"));
        l.upsert_detected(&jobs);
        assert!(l.entry("Metallic").unwrap().enabled);
        assert!(l.entry("Vertex Color:Col").unwrap().enabled);
    }
}
