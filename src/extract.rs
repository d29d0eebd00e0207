//! The extraction orchestrator: one report in, persisted records out.
//!
//! [`MarketReportExtractor::process_document`] runs every target of a
//! document through the same envelope:
//!
//! 1. look the target up in the local cache; a hit (value or recorded
//!    failure) ends the target without a model call;
//! 2. produce the value, either by asking the grounded session or with a
//!    local extractor;
//! 3. for model answers, recover the JSON block and check it against the
//!    target's schema; a failure caches the raw answer as `.txt`;
//! 4. persist the sanitized value through the store router, then cache
//!    the unsanitized value as `.json`.
//!
//! Target order for one document:
//!
//! ```text
//! snapshots (market)           model
//! submarkets                   model
//! segment + market copy        local
//! per submarket:
//!   historical_data            local (tables + CSV audit files)
//!   zipcodes                   local
//!   snapshots                  model
//!   report                     derived from snapshot + tables
//!   completed_properties ...   model, when extended targets are on
//! ```
//!
//! The session is bound on the first cache miss that needs the model, so
//! a fully cached rerun never binds one, and it is released before
//! `process_document` returns. A store failure aborts the document with
//! [`ExtractError::Persistence`].

use crate::cache::{ArtifactCache, CachedArtifact, prep_filename};
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, SkipReason, TargetFailure};
use crate::model::{BLOCK_CONFIGS, HistoricalData, SubmarketDescriptor};
use crate::output::{
    AskResponse, DocumentOutcome, DocumentStatus, SubmarketOutcome, TargetOutcome, TargetStatus,
};
use crate::pipeline::document::{LoadedDocument, PdfBackend, backend_for};
use crate::pipeline::input::resolve_input;
use crate::pipeline::json::{JsonRecovery, sanitize};
use crate::pipeline::report::derive_report;
use crate::pipeline::segment::{PdfSegmenter, SubDocument};
use crate::pipeline::session::{GroundedAssistant, GroundedSession, ProviderAssistant};
use crate::pipeline::tables::{extract_historical_data, write_audit_files};
use crate::pipeline::zipcodes::{extract_zip_codes, zip_code_records};
use crate::prompts;
use crate::schema::{
    HISTORICAL_DATA_LIST, MARKET_SNAPSHOT, PROPERTY_LIST, RecordSchema,
    SAMPLE_EXISTING_UNITS_LIST, SUBMARKET_LIST, SUBMARKET_REPORT, SUBMARKET_SNAPSHOT,
    SUPPLY_DEMAND_LIST, ZIPCODE_LIST,
};
use crate::store::{DocumentStore, persist_record};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives extraction for one document at a time.
///
/// Cheap to share: independent documents may run concurrently, each with
/// its own session.
pub struct MarketReportExtractor {
    config: ExtractionConfig,
    assistant: Arc<dyn GroundedAssistant>,
    store: Arc<dyn DocumentStore>,
    recovery: JsonRecovery,
    segmenter: PdfSegmenter,
}

impl MarketReportExtractor {
    pub fn new(
        config: ExtractionConfig,
        assistant: Arc<dyn GroundedAssistant>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ExtractError> {
        let recovery = JsonRecovery::new(&config.json_fence_pattern)?;
        let segmenter = PdfSegmenter::new(config.quarter_labels.clone());
        Ok(Self {
            config,
            assistant,
            store,
            recovery,
            segmenter,
        })
    }

    /// Build an extractor whose assistant wraps the configured LLM provider.
    pub fn from_config(
        config: ExtractionConfig,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ExtractError> {
        let assistant = Arc::new(ProviderAssistant::from_config(&config)?);
        Self::new(config, assistant, store)
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract, persist and cache every target of one report.
    pub async fn process_document(&self, path: &Path) -> Result<DocumentOutcome, ExtractError> {
        let input = resolve_input(path)?;
        let backend = backend_for(input.kind, &self.config);
        let doc = backend.load(&input.path).await?;
        info!("Processing {} ({} pages)", doc.path.display(), doc.page_count());
        if let Some(cb) = &self.config.progress_callback {
            cb.on_document_start(&doc.path, doc.page_count());
        }

        let stem = doc
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let cache = ArtifactCache::open(self.config.work_dir.join(prep_filename(&stem)))?;

        let mut run = DocumentRun {
            ex: self,
            doc: &doc,
            backend,
            cache,
            session: None,
            llm_requests: 0,
        };
        let result = run.execute(&stem).await;
        run.release().await;

        if let Some(cb) = &self.config.progress_callback {
            let processed = matches!(&result, Ok(o) if o.is_processed());
            cb.on_document_complete(&doc.path, processed);
        }
        match &result {
            Ok(outcome) => info!(
                "{}: {} ({} model requests)",
                doc.path.display(),
                outcome.status.directory_name(),
                outcome.llm_requests
            ),
            Err(e) => warn!("{}: aborted: {}", doc.path.display(), e),
        }
        result
    }

    /// Ask one free-form question about a report.
    ///
    /// No cache, no store. `json` holds the recovered JSON block, if any.
    pub async fn ask(&self, path: &Path, question: &str) -> Result<AskResponse, ExtractError> {
        let input = resolve_input(path)?;
        let doc = backend_for(input.kind, &self.config).load(&input.path).await?;
        let mut session = self.assistant.bind(&doc).await?;
        let answer = session.send(question).await;
        session.clear().await;

        let response_message = answer?;
        let json = match self.recovery.recover(&response_message) {
            Ok(value) => Some(value),
            Err(failure) => {
                debug!("No JSON in answer: {}", failure);
                None
            }
        };
        Ok(AskResponse {
            response_message,
            json,
        })
    }
}

// ── Per-document state ───────────────────────────────────────────────────

struct Target {
    outcome: TargetOutcome,
    value: Option<Value>,
}

impl Target {
    fn ok(&self) -> bool {
        self.outcome.is_success()
    }
}

fn is_empty_record(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Reject empty answers, then check required fields.
fn conform(schema: &RecordSchema, value: Value) -> Result<Value, TargetFailure> {
    if is_empty_record(&value) {
        return Err(TargetFailure::EmptyRecord);
    }
    schema
        .validate(&value)
        .map_err(|missing| TargetFailure::SchemaValidationFailed { missing })?;
    Ok(value)
}

struct DocumentRun<'a> {
    ex: &'a MarketReportExtractor,
    doc: &'a LoadedDocument,
    backend: Arc<dyn PdfBackend>,
    cache: ArtifactCache,
    session: Option<Box<dyn GroundedSession>>,
    llm_requests: usize,
}

impl DocumentRun<'_> {
    async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.clear().await;
        }
    }

    async fn session(&mut self) -> Result<&mut Box<dyn GroundedSession>, ExtractError> {
        if self.session.is_none() {
            self.session = Some(self.ex.assistant.bind(self.doc).await?);
        }
        self.session
            .as_mut()
            .ok_or_else(|| ExtractError::Internal("session not bound".into()))
    }

    fn finish(&self, name: &str, dir: Option<&str>, status: TargetStatus, value: Option<Value>) -> Target {
        match &status {
            TargetStatus::Extracted => info!("{} [{}]: extracted", name, dir.unwrap_or("market")),
            TargetStatus::Cached => info!("{} [{}]: cached", name, dir.unwrap_or("market")),
            TargetStatus::Failed { reason } => {
                warn!("{} [{}]: {}", name, dir.unwrap_or("market"), reason)
            }
        }
        if let Some(cb) = &self.ex.config.progress_callback {
            let error = match &status {
                TargetStatus::Failed { reason } => Some(reason.to_string()),
                _ => None,
            };
            cb.on_target_complete(name, dir, error.as_deref());
        }
        Target {
            outcome: TargetOutcome {
                name: name.to_string(),
                directory: dir.map(str::to_string),
                status,
            },
            value,
        }
    }

    fn fail(&self, name: &str, dir: Option<&str>, reason: TargetFailure) -> Target {
        self.finish(name, dir, TargetStatus::Failed { reason }, None)
    }

    // ── Envelope ──

    fn cache_hit(&self, name: &str, dir: Option<&str>) -> Option<Target> {
        match self.cache.lookup(name, dir)? {
            CachedArtifact::Value(value) => {
                Some(self.finish(name, dir, TargetStatus::Cached, Some(value)))
            }
            CachedArtifact::Failed { path, .. } => {
                Some(self.fail(name, dir, TargetFailure::PreviouslyFailed { path }))
            }
        }
    }

    /// Persist sanitized records, then cache the raw value.
    async fn accept(
        &self,
        name: &str,
        dir: Option<&str>,
        cache_value: &Value,
        records: &[(String, Value)],
    ) -> Result<(), ExtractError> {
        for (logical, value) in records {
            persist_record(self.ex.store.as_ref(), logical, &sanitize(value)).await?;
        }
        self.cache.store_value(name, dir, cache_value);
        Ok(())
    }

    /// A model-answered target.
    async fn ask_target(
        &mut self,
        name: &str,
        dir: Option<&str>,
        question: String,
        schema: &RecordSchema,
    ) -> Result<Target, ExtractError> {
        if let Some(hit) = self.cache_hit(name, dir) {
            return Ok(hit);
        }

        let answer = self.session().await?.send(&question).await;
        self.llm_requests += 1;
        let text = match answer {
            Ok(text) => text,
            Err(e) => {
                return Ok(self.fail(
                    name,
                    dir,
                    TargetFailure::RequestFailed {
                        detail: e.to_string(),
                    },
                ));
            }
        };

        let value = match self
            .ex
            .recovery
            .recover(&text)
            .and_then(|v| conform(schema, v))
        {
            Ok(value) => value,
            Err(failure) => {
                self.cache.store_failure(name, dir, &text);
                return Ok(self.fail(name, dir, failure));
            }
        };

        self.accept(name, dir, &value, &[(name.to_string(), value.clone())])
            .await?;
        Ok(self.finish(name, dir, TargetStatus::Extracted, Some(value)))
    }

    // ── Document flow ──

    async fn execute(&mut self, stem: &str) -> Result<DocumentOutcome, ExtractError> {
        let mut outcome = DocumentOutcome {
            document: self.doc.path.clone(),
            market: None,
            targets: Vec::new(),
            submarkets: Vec::new(),
            status: DocumentStatus::Incomplete,
            llm_requests: 0,
        };

        // ── Step 1: market snapshot ──
        let snapshot = self
            .ask_target("snapshots", None, prompts::market_snapshot(), &MARKET_SNAPSHOT)
            .await?;
        let market_ok = snapshot.ok();
        let market_snapshot = snapshot.value.clone();
        outcome.targets.push(snapshot.outcome);
        let Some(market_snapshot) = market_snapshot.filter(|_| market_ok) else {
            outcome.llm_requests = self.llm_requests;
            return Ok(outcome);
        };
        let market = market_snapshot
            .get("market")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(stem)
            .to_string();
        outcome.market = Some(market.clone());

        // ── Step 2: submarket list ──
        let list = self
            .ask_target("submarkets", None, prompts::submarket_list(), &SUBMARKET_LIST)
            .await?;
        let list_ok = list.ok();
        let mut descriptors: Vec<SubmarketDescriptor> = Vec::new();
        let mut rejected: Vec<SubmarketOutcome> = Vec::new();
        for item in list.value.as_ref().and_then(Value::as_array).into_iter().flatten() {
            match SubmarketDescriptor::from_value(item) {
                Some(d) => descriptors.push(d),
                None => {
                    warn!("Skipping malformed submarket entry: {}", item);
                    rejected.push(malformed(item));
                }
            }
        }
        outcome.targets.push(list.outcome);
        if !list_ok {
            outcome.llm_requests = self.llm_requests;
            return Ok(outcome);
        }

        // ── Step 3: market copy + segmentation ──
        let market_dir = self.ex.config.submarkets_dir.join(prep_filename(&market));
        let copy_path = market_dir.join(format!("market.{}", self.backend.extension()));
        if let Err(e) = self.backend.save_copy(self.doc, &copy_path).await {
            warn!("Cannot save market copy {}: {}", copy_path.display(), e);
        }
        let segments = self
            .ex
            .segmenter
            .segment(self.backend.as_ref(), self.doc, &descriptors, &market_dir)
            .await;

        // ── Step 4: submarkets ──
        let total = descriptors.len() + rejected.len();
        for (index, (d, segment)) in descriptors.iter().zip(segments).enumerate() {
            if let Some(cb) = &self.ex.config.progress_callback {
                cb.on_submarket_start(index, total, &d.name);
            }
            let sub = match segment {
                Ok(sub) => self.run_submarket(d, &sub, &market_snapshot).await?,
                Err(reason) => skipped(d, reason),
            };
            if let Some(cb) = &self.ex.config.progress_callback {
                cb.on_submarket_complete(index, total, &d.name, sub.success);
            }
            outcome.submarkets.push(sub);
        }
        let listed = outcome.submarkets.len();
        for (offset, sub) in rejected.into_iter().enumerate() {
            let index = listed + offset;
            if let Some(cb) = &self.ex.config.progress_callback {
                cb.on_submarket_start(index, total, &sub.name);
                cb.on_submarket_complete(index, total, &sub.name, false);
            }
            outcome.submarkets.push(sub);
        }

        outcome.llm_requests = self.llm_requests;
        if !outcome.submarkets.is_empty() && outcome.submarkets.iter().all(|s| s.success) {
            outcome.status = DocumentStatus::Processed;
        }
        Ok(outcome)
    }

    async fn run_submarket(
        &mut self,
        d: &SubmarketDescriptor,
        sub: &SubDocument,
        market_snapshot: &Value,
    ) -> Result<SubmarketOutcome, ExtractError> {
        info!("Submarket: {}", d.name);
        let dir = Some(d.name.as_str());
        let slice = self
            .backend
            .load(&sub.path)
            .await
            .map_err(|e| e.to_string());

        let mut targets = Vec::new();

        let historical = self
            .historical_target(d, sub, slice.as_ref(), market_snapshot)
            .await?;
        let data = historical
            .value
            .as_ref()
            .and_then(|v| match serde_json::from_value::<HistoricalData>(v.clone()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Cached historical data for '{}' is unusable: {}", d.name, e);
                    None
                }
            })
            .unwrap_or_else(HistoricalData::empty);
        targets.push(historical);

        let zipcodes = self
            .zipcode_target(d, slice.as_ref(), market_snapshot)
            .await?;
        targets.push(zipcodes);

        let snapshot = self
            .ask_target(
                "snapshots",
                dir,
                prompts::submarket_snapshot(&d.name),
                &SUBMARKET_SNAPSHOT,
            )
            .await?;
        let report = self.report_target(d, snapshot.value.as_ref(), &data).await?;
        targets.push(snapshot);
        targets.push(report);

        if self.ex.config.extended_targets {
            let extended = [
                (
                    "completed_properties",
                    prompts::completed_properties(&d.name),
                    &PROPERTY_LIST,
                ),
                (
                    "properties_under_construction",
                    prompts::properties_under_construction(&d.name),
                    &PROPERTY_LIST,
                ),
                (
                    "supply_demands",
                    prompts::supply_demand(&d.name),
                    &SUPPLY_DEMAND_LIST,
                ),
                (
                    "sample_existing_units",
                    prompts::sample_existing_units(&d.name),
                    &SAMPLE_EXISTING_UNITS_LIST,
                ),
            ];
            for (name, question, schema) in extended {
                targets.push(self.ask_target(name, dir, question, schema).await?);
            }
        }

        let success = targets.iter().all(Target::ok);
        Ok(SubmarketOutcome {
            submarket_key: d.submarket_key.clone(),
            name: d.name.clone(),
            pages: Some((sub.first_page, sub.last_page)),
            skipped: None,
            targets: targets.into_iter().map(|t| t.outcome).collect(),
            success,
        })
    }

    async fn historical_target(
        &mut self,
        d: &SubmarketDescriptor,
        sub: &SubDocument,
        slice: Result<&LoadedDocument, &String>,
        market_snapshot: &Value,
    ) -> Result<Target, ExtractError> {
        let (name, dir) = ("historical_data", Some(d.name.as_str()));
        if let Some(hit) = self.cache_hit(name, dir) {
            return Ok(hit);
        }
        let slice = match slice {
            Ok(slice) => slice,
            Err(detail) => {
                return Ok(self.fail(name, dir, TargetFailure::DerivationFailed {
                    detail: detail.clone(),
                }));
            }
        };

        let data = extract_historical_data(slice, &BLOCK_CONFIGS);
        write_audit_files(sub.directory(), &data, &BLOCK_CONFIGS);

        let state = market_snapshot.get("state").cloned().unwrap_or(Value::Null);
        let market = market_snapshot.get("market").cloned().unwrap_or(Value::Null);
        let mut records = Vec::new();
        for config in &BLOCK_CONFIGS {
            let rows = data.block_records(config, &state, &market, &d.name);
            if rows.is_empty() {
                continue;
            }
            let rows = Value::Array(rows);
            if let Err(missing) = HISTORICAL_DATA_LIST.validate(&rows) {
                return Ok(self.fail(name, dir, TargetFailure::SchemaValidationFailed { missing }));
            }
            records.push((format!("historical-{}", config.block_id), rows));
        }

        let value = serde_json::to_value(&data)
            .map_err(|e| ExtractError::Internal(format!("historical data: {e}")))?;
        self.accept(name, dir, &value, &records).await?;
        Ok(self.finish(name, dir, TargetStatus::Extracted, Some(value)))
    }

    async fn zipcode_target(
        &mut self,
        d: &SubmarketDescriptor,
        slice: Result<&LoadedDocument, &String>,
        market_snapshot: &Value,
    ) -> Result<Target, ExtractError> {
        let (name, dir) = ("zipcodes", Some(d.name.as_str()));
        if let Some(hit) = self.cache_hit(name, dir) {
            return Ok(hit);
        }
        let slice = match slice {
            Ok(slice) => slice,
            Err(detail) => {
                return Ok(self.fail(name, dir, TargetFailure::DerivationFailed {
                    detail: detail.clone(),
                }));
            }
        };

        let records = zip_code_records(&extract_zip_codes(slice), d, market_snapshot);
        let value = serde_json::to_value(&records)
            .map_err(|e| ExtractError::Internal(format!("zip codes: {e}")))?;
        if let Err(missing) = ZIPCODE_LIST.validate(&value) {
            return Ok(self.fail(name, dir, TargetFailure::SchemaValidationFailed { missing }));
        }
        if records.is_empty() {
            debug!("No zip codes for '{}'", d.name);
        }
        self.accept(name, dir, &value, &[(name.to_string(), value.clone())])
            .await?;
        Ok(self.finish(name, dir, TargetStatus::Extracted, Some(value)))
    }

    /// Derived targets are recomputed on every miss; failures are not cached.
    async fn report_target(
        &mut self,
        d: &SubmarketDescriptor,
        snapshot: Option<&Value>,
        data: &HistoricalData,
    ) -> Result<Target, ExtractError> {
        let (name, dir) = ("report", Some(d.name.as_str()));
        if let Some(hit) = self.cache_hit(name, dir) {
            return Ok(hit);
        }
        let Some(snapshot) = snapshot else {
            return Ok(self.fail(name, dir, TargetFailure::DerivationFailed {
                detail: "submarket snapshot unavailable".into(),
            }));
        };

        let report = match derive_report(snapshot, data).and_then(|r| conform(&SUBMARKET_REPORT, r)) {
            Ok(report) => report,
            Err(failure) => return Ok(self.fail(name, dir, failure)),
        };
        self.accept(name, dir, &report, &[(name.to_string(), report.clone())])
            .await?;
        Ok(self.finish(name, dir, TargetStatus::Extracted, Some(report)))
    }
}

fn skipped(d: &SubmarketDescriptor, reason: SkipReason) -> SubmarketOutcome {
    SubmarketOutcome {
        submarket_key: d.submarket_key.clone(),
        name: d.name.clone(),
        pages: None,
        skipped: Some(reason),
        targets: Vec::new(),
        success: false,
    }
}

/// Outcome for a submarket-list entry that did not yield a descriptor.
fn malformed(item: &Value) -> SubmarketOutcome {
    let text = |field: &str| match item.get(field) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    SubmarketOutcome {
        submarket_key: text("submarket_key"),
        name: text("name"),
        pages: None,
        skipped: Some(SkipReason::MalformedEntry {
            entry: item.to_string(),
        }),
        targets: Vec::new(),
        success: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_answers_are_rejected_before_validation() {
        assert_eq!(conform(&SUBMARKET_LIST, json!([])), Err(TargetFailure::EmptyRecord));
        assert_eq!(conform(&MARKET_SNAPSHOT, json!({})), Err(TargetFailure::EmptyRecord));
        assert_eq!(conform(&MARKET_SNAPSHOT, Value::Null), Err(TargetFailure::EmptyRecord));
    }

    #[test]
    fn conform_reports_missing_fields() {
        match conform(&SUBMARKET_LIST, json!([{"submarket_key": 1}])) {
            Err(TargetFailure::SchemaValidationFailed { missing }) => {
                assert_eq!(missing, vec!["[0].name".to_string()])
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(conform(&SUBMARKET_LIST, json!([{"submarket_key": 1, "name": "A"}])).is_ok());
    }
}
