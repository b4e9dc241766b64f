//! Built-in rules.
//!
//! | Rule | Decision | True for |
//! |------|----------|----------|
//! | [`MaterializeOnMissingRule`] | materialize | candidates never materialized and not already handled |
//! | [`MaterializeOnParentUpdatedRule`] | materialize | candidates whose parents updated or will update this tick |
//! | [`SkipOnParentMissingRule`] | skip | candidates with a parent that has no data and will not get any this tick |

use cadence_types::AssetSubset;
use tracing::debug;

use crate::EvaluationError;
use crate::context::EvaluationContext;
use crate::result::{EvaluationInfo, ExtraState};
use crate::rule::{DecisionType, Rule};

// ---------------------------------------------------------------------------
// Missing
// ---------------------------------------------------------------------------

/// Materialize partitions that have never been materialized.
///
/// Stores the subset it has already handled (materialized, requested, or
/// discarded) as extra state, so a partition is requested at most once even
/// if its run has not completed by the next tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOnMissingRule;

impl MaterializeOnMissingRule {
    /// Partitions already materialized or requested.
    ///
    /// Falls back to the instance's materialization record when no state was
    /// stored on the previous tick.
    fn handled_subset(
        context: &EvaluationContext<'_>,
    ) -> Result<AssetSubset, EvaluationError> {
        let previous = match context
            .previous_extra_state::<AssetSubset>()
            .filter(|subset| context.is_compatible(subset))
        {
            Some(subset) => subset,
            None => {
                let materialized = context.query().materialized_subset(context.asset_key())?;
                if context.is_compatible(&materialized) {
                    materialized
                } else {
                    context.empty_subset()
                }
            }
        };
        Ok(previous.union(&context.materialized_requested_or_discarded_since_previous_tick_subset()))
    }
}

impl Rule for MaterializeOnMissingRule {
    fn class_name(&self) -> &'static str {
        "MaterializeOnMissingRule"
    }

    fn description(&self) -> String {
        "materialization is missing".to_owned()
    }

    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        let handled = Self::handled_subset(context)?;
        let true_subset = context.candidate_subset().subtract(&handled);
        Ok(EvaluationInfo::create(
            context,
            true_subset,
            Vec::new(),
            Some(ExtraState::Subset(handled)),
        ))
    }
}

// ---------------------------------------------------------------------------
// Parent updated
// ---------------------------------------------------------------------------

/// Materialize partitions whose upstream data changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOnParentUpdatedRule;

impl Rule for MaterializeOnParentUpdatedRule {
    fn class_name(&self) -> &'static str {
        "MaterializeOnParentUpdatedRule"
    }

    fn description(&self) -> String {
        "upstream data has changed since latest materialization".to_owned()
    }

    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        Ok(EvaluationInfo::create(
            context,
            context.candidate_parent_has_or_will_update_subset(),
            Vec::new(),
            None,
        ))
    }
}

// ---------------------------------------------------------------------------
// Parent missing
// ---------------------------------------------------------------------------

/// Hold back partitions whose upstream data does not exist yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipOnParentMissingRule;

impl Rule for SkipOnParentMissingRule {
    fn class_name(&self) -> &'static str {
        "SkipOnParentMissingRule"
    }

    fn description(&self) -> String {
        "waiting on upstream data".to_owned()
    }

    fn decision_type(&self) -> DecisionType {
        DecisionType::Skip
    }

    fn evaluate_for_asset(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationInfo, EvaluationError> {
        let candidates = context.candidate_subset();
        let mut waiting = context.empty_subset();
        for parent in context.query().parents(context.asset_key())? {
            let mut available = context.query().materialized_subset(&parent)?;
            if let Some(result) = context
                .same_tick_result(&parent)
                .filter(|result| result.true_subset.is_compatible_with(&available))
            {
                available = available.union(&result.true_subset);
            }
            let missing = match context.relabel_parent_subset(&available) {
                Some(relabelled) => candidates.subtract(&relabelled),
                None if available.bool_value() => context.empty_subset(),
                None => candidates.clone(),
            };
            if !missing.is_empty() {
                debug!(
                    asset_key = %context.asset_key(),
                    parent = %parent,
                    waiting = missing.size(),
                    "Parent data missing"
                );
            }
            waiting = waiting.union(&missing);
        }
        Ok(EvaluationInfo::create(context, waiting, Vec::new(), None))
    }
}
