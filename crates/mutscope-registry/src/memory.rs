//! In-memory [`MutantRegistry`] for tests and dry runs.

use std::collections::BTreeMap;

use mutscope_core::{MutantRecord, MutantStatus, MutscopeError};

use crate::store::{LineRewrite, MutantRegistry};

/// Registry kept in a `Vec`, enumerated in insertion order.
///
/// # Examples
///
/// ```
/// use mutscope_core::{MutantRecord, MutantStatus};
/// use mutscope_registry::{MemoryRegistry, MutantRegistry};
///
/// let mut registry = MemoryRegistry::from_mutants(vec![MutantRecord::new("a.py", 0, "number", 0)]);
/// let mutant = registry.mutants(None).unwrap().remove(0);
/// registry.set_status(&mutant, MutantStatus::Killed, "fp").unwrap();
/// assert_eq!(registry.tested_mutants().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    mutants: Vec<MutantRecord>,
    metadata: BTreeMap<String, String>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `mutants` as given.
    pub fn from_mutants(mutants: Vec<MutantRecord>) -> Self {
        Self {
            mutants,
            metadata: BTreeMap::new(),
        }
    }

    fn position(&self, mutant: &MutantRecord) -> Option<usize> {
        self.mutants.iter().position(|m| m.same_mutant(mutant))
    }
}

impl MutantRegistry for MemoryRegistry {
    fn mutants(&self, status: Option<MutantStatus>) -> Result<Vec<MutantRecord>, MutscopeError> {
        Ok(self
            .mutants
            .iter()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect())
    }

    fn find(&self, mutant: &MutantRecord) -> Result<Option<MutantRecord>, MutscopeError> {
        Ok(self.position(mutant).map(|i| self.mutants[i].clone()))
    }

    fn set_status(
        &mut self,
        mutant: &MutantRecord,
        status: MutantStatus,
        fingerprint: &str,
    ) -> Result<(), MutscopeError> {
        let index = match self.position(mutant) {
            Some(i) => i,
            None => {
                self.mutants.push(mutant.clone());
                self.mutants.len() - 1
            }
        };
        let stored = &mut self.mutants[index];
        stored.status = status;
        stored.tests_fingerprint = fingerprint.to_string();
        Ok(())
    }

    fn create_mutants(&mut self, mutants: &[MutantRecord]) -> Result<usize, MutscopeError> {
        let mut created = 0;
        for m in mutants {
            if self.position(m).is_none() {
                self.mutants.push(m.clone());
                created += 1;
            }
        }
        Ok(created)
    }

    fn rewrite_line_numbers(
        &mut self,
        file: &str,
        project: &dyn Fn(u32) -> Option<u32>,
    ) -> Result<LineRewrite, MutscopeError> {
        let mut outcome = LineRewrite::default();
        self.mutants.retain_mut(|m| {
            if m.file != file {
                return true;
            }
            match project(m.line_number) {
                None => {
                    outcome.dropped += 1;
                    false
                }
                Some(new) => {
                    if new != m.line_number {
                        m.line_number = new;
                        outcome.moved += 1;
                    }
                    true
                }
            }
        });
        Ok(outcome)
    }

    fn metadata(&self, key: &str) -> Result<Option<String>, MutscopeError> {
        Ok(self.metadata.get(key).cloned())
    }

    fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), MutscopeError> {
        self.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_sqlite_for_rewrite() {
        let mut registry = MemoryRegistry::from_mutants(vec![
            MutantRecord::new("a.py", 1, "number", 0),
            MutantRecord::new("a.py", 4, "operator", 0),
            MutantRecord::new("b.py", 4, "operator", 0),
        ]);
        let outcome = registry
            .rewrite_line_numbers("a.py", &|l| if l == 1 { None } else { Some(l + 2) })
            .unwrap();
        assert_eq!(outcome, LineRewrite { moved: 1, dropped: 1 });
        let all = registry.mutants(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].line_number, 6);
        assert_eq!(all[1].line_number, 4);
    }

    #[test]
    fn create_skips_existing() {
        let mutant = MutantRecord::new("a.py", 0, "number", 0);
        let mut registry = MemoryRegistry::new();
        assert_eq!(registry.create_mutants(&[mutant.clone(), mutant.clone()]).unwrap(), 1);
        assert_eq!(registry.mutants(Some(MutantStatus::Untested)).unwrap().len(), 1);
    }
}
