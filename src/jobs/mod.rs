//! Bake job model and derivation.

pub mod derive;
pub mod list;
pub mod tables;

use serde::Serialize;

use crate::bake::types::BakeTarget;
use crate::settings::ColorDepth;

pub use derive::{derive_jobs, detect_jobs};

/// A named unit of bake work. Identity is `(name, sub_name)`; vertex color
/// jobs carry their layer as the sub-name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    pub sub_name: Option<String>,
    pub suffix: Option<String>,
    pub samples: Option<u32>,
    pub color_depth: Option<ColorDepth>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_name: None,
            suffix: None,
            samples: None,
            color_depth: None,
        }
    }

    pub fn vertex_color(layer: impl Into<String>) -> Self {
        Self {
            sub_name: Some(layer.into()),
            ..Self::new(tables::JOB_VERTEX_COLOR)
        }
    }

    pub fn key(&self) -> (&str, Option<&str>) {
        (self.name.as_str(), self.sub_name.as_deref())
    }

    /// `name`, or `name:sub_name` for per-layer jobs.
    pub fn display_name(&self) -> String {
        match &self.sub_name {
            Some(sub) => format!("{}:{sub}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn target(&self) -> BakeTarget {
        BakeTarget::for_job(&self.name, self.sub_name.as_deref())
    }
}

/// Insertion-ordered set of jobs keyed by `(name, sub_name)`.
///
/// Re-inserting a job keeps its first position; attributes the newer job
/// sets overwrite the older ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSet {
    jobs: Vec<Job>,
}

impl JobSet {
    pub fn insert(&mut self, job: Job) {
        match self.jobs.iter_mut().find(|j| j.key() == job.key()) {
            Some(existing) => {
                if job.suffix.is_some() {
                    existing.suffix = job.suffix;
                }
                if job.samples.is_some() {
                    existing.samples = job.samples;
                }
                if job.color_depth.is_some() {
                    existing.color_depth = job.color_depth;
                }
            }
            None => self.jobs.push(job),
        }
    }

    pub fn insert_name(&mut self, name: &str) {
        self.insert(Job::new(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.iter().any(|j| j.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.iter().map(Job::display_name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_vec(self) -> Vec<Job> {
        self.jobs
    }
}

impl FromIterator<Job> for JobSet {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        let mut set = JobSet::default();
        for job in iter {
            set.insert(job);
        }
        set
    }
}
