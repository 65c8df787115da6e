//! Workflow chains and their structural rules.
//!
//! A chain is an ordered list of steps. The "next" link of a step is its index plus
//! one; the engine walks the list with a position pointer. Chains are certified
//! once by [`ChainBuilder::build`] and are immutable afterwards.

use std::collections::HashSet;
use thiserror::Error;

use super::step::Step;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidChainError {
    #[error("{chain}: expected exactly one terminal step, found {count}")]
    TerminalCount { chain: String, count: usize },
    #[error("{chain}: terminal step {step} is not the last step")]
    TerminalNotLast { chain: String, step: String },
    #[error("{chain}: duplicate step name {step}")]
    DuplicateName { chain: String, step: String },
    #[error("{chain}: step {step} follows sensitive step {sensitive} but is not sensitive")]
    SensitiveLeak {
        chain: String,
        step: String,
        sensitive: String,
    },
}

/// Structural rule checked when a chain is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRule {
    /// Exactly one terminal step, in last position.
    TerminalLast,
    /// Step names are unique within the chain.
    UniqueNames,
    /// After the first sensitive step, every step is sensitive or terminal.
    SensitiveTail,
}

impl ChainRule {
    /// Rules every chain is certified against.
    pub const BASE: [Self; 3] = [Self::TerminalLast, Self::UniqueNames, Self::SensitiveTail];

    /// # Errors
    /// Returns the first violation found.
    pub fn check(self, chain: &str, steps: &[Step]) -> Result<(), InvalidChainError> {
        match self {
            Self::TerminalLast => {
                let terminals: Vec<&Step> = steps.iter().filter(|s| s.is_terminal()).collect();
                if terminals.len() != 1 {
                    return Err(InvalidChainError::TerminalCount {
                        chain: chain.to_string(),
                        count: terminals.len(),
                    });
                }
                match steps.last() {
                    Some(last) if last.is_terminal() => Ok(()),
                    _ => Err(InvalidChainError::TerminalNotLast {
                        chain: chain.to_string(),
                        step: terminals[0].name().to_string(),
                    }),
                }
            }
            Self::UniqueNames => {
                let mut seen = HashSet::new();
                for step in steps {
                    if !seen.insert(step.name()) {
                        return Err(InvalidChainError::DuplicateName {
                            chain: chain.to_string(),
                            step: step.name().to_string(),
                        });
                    }
                }
                Ok(())
            }
            Self::SensitiveTail => {
                let Some(first) = steps.iter().position(Step::is_sensitive) else {
                    return Ok(());
                };
                for step in &steps[first + 1..] {
                    if !(step.is_sensitive() || step.is_terminal()) {
                        return Err(InvalidChainError::SensitiveLeak {
                            chain: chain.to_string(),
                            step: step.name().to_string(),
                            sensitive: steps[first].name().to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// Collects steps, then certifies the chain against [`ChainRule::BASE`].
pub struct ChainBuilder {
    name: String,
    steps: Vec<Step>,
}

impl ChainBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// # Errors
    /// Returns [`InvalidChainError`] if any rule is violated.
    pub fn build(self) -> Result<WorkflowChain, InvalidChainError> {
        for rule in ChainRule::BASE {
            rule.check(&self.name, &self.steps)?;
        }
        Ok(WorkflowChain {
            name: self.name,
            steps: self.steps,
        })
    }
}

#[derive(Debug)]
pub struct WorkflowChain {
    name: String,
    steps: Vec<Step>,
}

impl WorkflowChain {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn step(&self, position: usize) -> Option<&Step> {
        self.steps.get(position)
    }

    /// Position of the step called `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name() == name)
    }

    #[must_use]
    pub fn terminal_position(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(Step::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::validators::{AcceptAll, DisplayNameValidator, PasswordStrength};

    fn plain(name: &str) -> Step {
        Step::field(name, DisplayNameValidator)
    }

    fn sensitive(name: &str) -> Step {
        Step::sensitive(name, PasswordStrength)
    }

    fn terminal(name: &str) -> Step {
        Step::terminal(name, AcceptAll)
    }

    #[test]
    fn builds_valid_chain() -> Result<(), InvalidChainError> {
        let chain = ChainBuilder::new("registration")
            .then(plain("Username"))
            .then(plain("Email"))
            .then(sensitive("Password"))
            .then(sensitive("PasswordRepeat"))
            .then(terminal("CompleteRegistration"))
            .build()?;
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.position("Password"), Some(2));
        assert_eq!(chain.terminal_position(), 4);
        assert_eq!(
            chain.names().collect::<Vec<_>>(),
            ["Username", "Email", "Password", "PasswordRepeat", "CompleteRegistration"]
        );
        Ok(())
    }

    #[test]
    fn rejects_missing_terminal() {
        let result = ChainBuilder::new("x").then(plain("A")).build();
        assert_eq!(
            result.err(),
            Some(InvalidChainError::TerminalCount {
                chain: "x".to_string(),
                count: 0
            })
        );

        let result = ChainBuilder::new("empty").build();
        assert!(matches!(
            result,
            Err(InvalidChainError::TerminalCount { count: 0, .. })
        ));
    }

    #[test]
    fn rejects_two_terminals() {
        let result = ChainBuilder::new("x")
            .then(terminal("Done"))
            .then(terminal("AlsoDone"))
            .build();
        assert!(matches!(
            result,
            Err(InvalidChainError::TerminalCount { count: 2, .. })
        ));
    }

    #[test]
    fn rejects_terminal_in_the_middle() {
        let result = ChainBuilder::new("x")
            .then(terminal("Done"))
            .then(plain("A"))
            .build();
        assert!(matches!(
            result,
            Err(InvalidChainError::TerminalNotLast { step, .. }) if step == "Done"
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = ChainBuilder::new("x")
            .then(plain("Email"))
            .then(plain("Email"))
            .then(terminal("Done"))
            .build();
        assert!(matches!(
            result,
            Err(InvalidChainError::DuplicateName { step, .. }) if step == "Email"
        ));
    }

    #[test]
    fn rejects_plain_step_after_sensitive() {
        let result = ChainBuilder::new("x")
            .then(sensitive("Password"))
            .then(plain("Nickname"))
            .then(terminal("Done"))
            .build();
        assert!(matches!(
            result,
            Err(InvalidChainError::SensitiveLeak { step, sensitive, .. })
                if step == "Nickname" && sensitive == "Password"
        ));
    }

    #[test]
    fn every_chain_checks_sensitive_tail() {
        let result = ChainBuilder::new("x")
            .then(sensitive("Password"))
            .then(plain("Echo"))
            .then(terminal("Done"))
            .build();
        assert!(matches!(
            result,
            Err(InvalidChainError::SensitiveLeak { step, .. }) if step == "Echo"
        ));

        assert!(ChainRule::BASE.contains(&ChainRule::SensitiveTail));
    }
}
