//! Task catalog: the immutable registry of task kinds a world can run.
//!
//! The catalog is validated once when it is built. Prerequisite names must
//! resolve to other catalog entries and must not form a cycle, so admission
//! never has to deal with a dangling or unsatisfiable reference.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use contracts::TaskDefinition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    NotFound(String),
    DuplicateTask(String),
    UnknownPrerequisite { task: String, prerequisite: String },
    SelfPrerequisite(String),
    PrerequisiteCycle(Vec<String>),
    ZeroDuration(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "task {name:?} is not in the catalog"),
            Self::DuplicateTask(name) => write!(f, "task {name:?} is defined more than once"),
            Self::UnknownPrerequisite { task, prerequisite } => write!(
                f,
                "task {task:?} requires unknown prerequisite {prerequisite:?}"
            ),
            Self::SelfPrerequisite(name) => write!(f, "task {name:?} lists itself as a prerequisite"),
            Self::PrerequisiteCycle(path) => {
                write!(f, "prerequisite cycle: {}", path.join(" -> "))
            }
            Self::ZeroDuration(name) => write!(f, "task {name:?} must last at least one tick"),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCatalog {
    definitions: Vec<TaskDefinition>,
    by_name: BTreeMap<String, usize>,
}

impl TaskCatalog {
    /// Build and validate a catalog. Zero-amount cost and reward entries are dropped.
    pub fn from_definitions(definitions: Vec<TaskDefinition>) -> Result<Self, CatalogError> {
        let mut catalog = Self {
            definitions: Vec::with_capacity(definitions.len()),
            by_name: BTreeMap::new(),
        };

        for mut definition in definitions {
            if catalog.by_name.contains_key(&definition.name) {
                return Err(CatalogError::DuplicateTask(definition.name));
            }
            if definition.duration_ticks == 0 {
                return Err(CatalogError::ZeroDuration(definition.name));
            }
            definition.costs.retain(|_, amount| *amount > 0);
            definition.rewards.retain(|_, amount| *amount > 0);
            dedup_in_order(&mut definition.prerequisites);

            catalog
                .by_name
                .insert(definition.name.clone(), catalog.definitions.len());
            catalog.definitions.push(definition);
        }

        catalog.validate_prerequisites()?;
        Ok(catalog)
    }

    /// The colony's built-in task kinds.
    pub fn default_catalog() -> Self {
        let definitions = vec![
            TaskDefinition::new("Repair Comms Hub", 5)
                .with_description("Restore the colony's link to the outside")
                .with_cost("materials", 20)
                .with_reward("energy", 10),
            TaskDefinition::new("Upgrade Antennas", 8)
                .with_description("Boost signal range once comms are back")
                .with_cost("materials", 50)
                .with_prerequisite("Repair Comms Hub")
                .with_reward("data", 20),
            TaskDefinition::new("Genetic Experiment", 6)
                .with_cost("data", 15)
                .with_reward("data", 25),
            TaskDefinition::new("Organize Storage", 3)
                .with_cost("materials", 10)
                .with_reward("materials", 15),
            TaskDefinition::new("Send Signal", 4)
                .with_cost("energy", 10)
                .with_reward("data", 10),
        ];

        match Self::from_definitions(definitions) {
            Ok(catalog) => catalog,
            Err(err) => unreachable!("built-in catalog is invalid: {err}"),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&TaskDefinition, CatalogError> {
        self.get(name)
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.by_name.get(name).map(|&idx| &self.definitions[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Definitions in load order.
    pub fn definitions(&self) -> &[TaskDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn validate_prerequisites(&self) -> Result<(), CatalogError> {
        for definition in &self.definitions {
            for prerequisite in &definition.prerequisites {
                if prerequisite == &definition.name {
                    return Err(CatalogError::SelfPrerequisite(definition.name.clone()));
                }
                if !self.contains(prerequisite) {
                    return Err(CatalogError::UnknownPrerequisite {
                        task: definition.name.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        let mut finished = BTreeSet::new();
        for definition in &self.definitions {
            let mut path = Vec::new();
            self.visit(&definition.name, &mut path, &mut finished)?;
        }
        Ok(())
    }

    // Depth-first walk; a name already on `path` closes a cycle.
    fn visit<'a>(
        &'a self,
        name: &'a str,
        path: &mut Vec<&'a str>,
        finished: &mut BTreeSet<&'a str>,
    ) -> Result<(), CatalogError> {
        if finished.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|entry| *entry == name) {
            let mut cycle = path[start..]
                .iter()
                .map(|entry| entry.to_string())
                .collect::<Vec<_>>();
            cycle.push(name.to_string());
            return Err(CatalogError::PrerequisiteCycle(cycle));
        }

        path.push(name);
        if let Some(definition) = self.get(name) {
            for prerequisite in &definition.prerequisites {
                self.visit(prerequisite, path, finished)?;
            }
        }
        path.pop();
        finished.insert(name);
        Ok(())
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

fn dedup_in_order(names: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    names.retain(|name| seen.insert(name.clone()));
}
