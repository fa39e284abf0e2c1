// passes — Graph passes run by the optimizer pipeline
//
// Each pass is a `Propagator` driven by the engine in `propagate.rs`.

pub mod concreteness;
pub mod dead_code;
pub mod fold;
pub mod inline;
pub mod literalize;

pub use concreteness::TypeConcreteness;
pub use dead_code::DeadCodeEliminator;
pub use fold::ConstantFolder;
pub use inline::FunctionInlining;
pub use literalize::Literalizer;

use crate::config::OptimizerOptions;
use crate::pass::PassId;
use crate::propagate::Propagator;

/// Instantiate a pass. Certification is not a schedulable pass and yields
/// `None`; the pipeline runs it directly.
pub fn build_pass(id: PassId, options: &OptimizerOptions) -> Option<Box<dyn Propagator>> {
    let pass: Box<dyn Propagator> = match id {
        PassId::Certify => return None,
        PassId::ConstantFold => Box::new(ConstantFolder::default()),
        PassId::Literalize => Box::new(Literalizer),
        PassId::DeadCode => Box::new(DeadCodeEliminator::default()),
        PassId::Inline => Box::new(FunctionInlining::new(options.inline_threshold)),
        PassId::CheckTypes => Box::new(TypeConcreteness::default()),
    };
    Some(pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{descriptor, ALL_PASSES};

    #[test]
    fn built_passes_match_their_descriptors() {
        let options = OptimizerOptions::default();
        for id in ALL_PASSES {
            let Some(pass) = build_pass(id, &options) else {
                assert_eq!(id, PassId::Certify);
                continue;
            };
            let desc = descriptor(id);
            assert_eq!(pass.name(), desc.name);
            assert_eq!(pass.kinds(), desc.kinds);
        }
    }
}
