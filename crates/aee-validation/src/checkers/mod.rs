//! Built-in checkers for all four levels

mod atomic;
mod component;
mod module;
mod system;

pub use atomic::{SignatureCheck, SingleResponsibilityCheck, SizeCeilingCheck, SyntaxCheck};
pub use component::{CrossModuleResolutionCheck, DependencyClosureCheck};
pub use module::{DuplicateSymbolCheck, InterfaceConsistencyCheck};
pub use system::{AcceptanceCoverageCheck, GlobalUniquenessCheck, UnresolvedImportCheck};

use crate::checker::Checker;
use std::sync::Arc;

/// One instance of every built-in checker
#[must_use]
pub fn builtin() -> Vec<Arc<dyn Checker>> {
    vec![
        Arc::new(SyntaxCheck),
        Arc::new(SizeCeilingCheck),
        Arc::new(SingleResponsibilityCheck),
        Arc::new(SignatureCheck),
        Arc::new(DuplicateSymbolCheck),
        Arc::new(InterfaceConsistencyCheck),
        Arc::new(CrossModuleResolutionCheck),
        Arc::new(DependencyClosureCheck),
        Arc::new(GlobalUniquenessCheck),
        Arc::new(AcceptanceCoverageCheck),
        Arc::new(UnresolvedImportCheck),
    ]
}
