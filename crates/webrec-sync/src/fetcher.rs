//! Ordered fallback over completed-occurrence identifiers.

use webrec_adapters::{ApiContext, ApiError, Endpoint, WebinarApi};
use webrec_core::{
    ActualData, ActualDataCapture, ApiCallRecord, CallOutcome, OccurrenceRecord, StrategyKind,
    WebinarRecord,
};

use crate::detector::CompletionAssessment;
use crate::diagnostics::{DiagnosticEvent, Diagnostics, EventOutcome, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStrategy {
    pub kind: StrategyKind,
    pub identifier: String,
}

impl FetchStrategy {
    pub fn endpoint(&self, webinar_id: &str) -> Endpoint {
        match self.kind {
            StrategyKind::InstanceDetail => Endpoint::InstanceDetail {
                webinar_id: webinar_id.to_string(),
                occurrence_id: self.identifier.clone(),
            },
            _ => Endpoint::PastOccurrence {
                identifier: self.identifier.clone(),
            },
        }
    }
}

/// Best identifier first, then each remaining identifier family once, then the
/// instance-detail endpoint.
pub fn plan_strategies(
    webinar: &WebinarRecord,
    occurrence: &OccurrenceRecord,
    assessment: &CompletionAssessment,
) -> Vec<FetchStrategy> {
    let mut plan = vec![FetchStrategy {
        kind: assessment.strategy,
        identifier: assessment.best_identifier.clone(),
    }];
    let occurrence_uuid = if occurrence.expanded { occurrence.uuid.clone() } else { None };
    let candidates = [
        (StrategyKind::OccurrenceUuid, occurrence_uuid),
        (StrategyKind::WebinarUuid, webinar.uuid.clone()),
        (StrategyKind::NumericId, Some(webinar.id.clone())),
    ];
    for (kind, identifier) in candidates {
        let Some(identifier) = identifier
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        else {
            continue;
        };
        if plan.iter().any(|s| s.identifier == identifier) {
            continue;
        }
        plan.push(FetchStrategy { kind, identifier });
    }
    plan.push(FetchStrategy {
        kind: StrategyKind::InstanceDetail,
        identifier: occurrence.occurrence_id.clone(),
    });
    plan
}

async fn call_strategy(
    api: &dyn WebinarApi,
    ctx: &ApiContext,
    webinar_id: &str,
    strategy: &FetchStrategy,
) -> Result<ActualData, ApiError> {
    match strategy.kind {
        StrategyKind::InstanceDetail => {
            api.get_instance_detail(ctx, webinar_id, &strategy.identifier)
                .await
        }
        _ => api.get_past_occurrence(ctx, &strategy.identifier).await,
    }
}

/// Try each strategy until one returns timing. Never fails: exhaustion yields
/// `success == false` with every attempt recorded.
pub async fn fetch_actual_data(
    api: &dyn WebinarApi,
    ctx: &ApiContext,
    webinar: &WebinarRecord,
    occurrence: &OccurrenceRecord,
    assessment: &CompletionAssessment,
    diagnostics: &Diagnostics,
) -> ActualDataCapture {
    let mut capture = ActualDataCapture {
        success: false,
        strategy: None,
        data: None,
        api_calls_made: Vec::new(),
        errors: Vec::new(),
    };
    let event_id = format!("{}/{}", webinar.id, occurrence.occurrence_id);

    for strategy in plan_strategies(webinar, occurrence, assessment) {
        let endpoint = strategy.endpoint(&webinar.id).path();
        let result = call_strategy(api, ctx, &webinar.id, &strategy).await;
        let (outcome, error, data) = match result {
            Ok(data) if data.has_timing() => (CallOutcome::Usable, None, Some(data)),
            Ok(_) => (
                CallOutcome::Unhelpful,
                Some("response carried no timing fields".to_string()),
                None,
            ),
            Err(err) => (CallOutcome::Failed, Some(err.to_string()), None),
        };

        let event_outcome = match outcome {
            CallOutcome::Usable => EventOutcome::Ok,
            CallOutcome::Unhelpful => EventOutcome::Unhelpful,
            CallOutcome::Failed => EventOutcome::Failed,
        };
        let mut event = DiagnosticEvent::new(Stage::Fetch, &event_id, event_outcome)
            .strategy(strategy.kind.as_str());
        if let Some(error) = &error {
            event = event.detail(error.clone());
            capture.errors.push(format!("{}: {error}", strategy.kind));
        }
        diagnostics.record(event);

        capture.api_calls_made.push(ApiCallRecord {
            strategy: strategy.kind,
            identifier: strategy.identifier.clone(),
            endpoint,
            outcome,
            error,
        });

        if let Some(data) = data {
            capture.success = true;
            capture.strategy = Some(strategy.kind);
            capture.data = Some(data);
            break;
        }
    }
    capture
}
