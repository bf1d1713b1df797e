//! HTTP handlers

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use natlang_core::assets::{PendingTransfer, TransferRecord};
use natlang_core::lineage::{DerivationTree, DerivativeType, EntryRef, LineageLink, DEFAULT_MAX_DEPTH};
use natlang_core::{
    AggregateDecision, AssetRegistry, Block, ChainReport, Entry, EntryLocation, LineageRegistry, Metadata,
    ValidationRecord,
};

use super::error::ApiError;
use super::AppState;
use crate::audit::AuditEntry;
use crate::coordinator::{EntryState, Health, NodeStats, SubmitOptions, Submission};

type ApiResult<T> = Result<T, ApiError>;

fn default_true() -> bool {
    true
}

/// Body of `POST /entry` and `POST /entry/validate`.
#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    pub content: String,
    pub author: String,
    pub intent: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default)]
    pub auto_mine: bool,
    /// Client-chosen creation time; resending the same body is then idempotent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Bound on semantic validation, in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub difficulty: Option<u32>,
}

impl EntryRequest {
    fn to_entry(&self) -> Entry {
        let mut entry = Entry::new(&self.content, &self.author, &self.intent);
        if let Some(metadata) = &self.metadata {
            entry = entry.with_metadata(metadata.clone());
        }
        if let Some(timestamp) = self.timestamp {
            entry = entry.with_timestamp(timestamp);
        }
        entry
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request("Invalid request body", Some(rejection.body_text())))
}

/// An absent or blank body means defaults; anything else must parse.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request("Invalid request body", Some(e.to_string())))
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub fingerprint: String,
    pub state: EntryState,
    pub entry: Entry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mined_block: Option<Block>,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_message: Option<&'static str>,
}

impl From<Submission> for SubmitResponse {
    fn from(submission: Submission) -> Self {
        let status = match submission.decision() {
            AggregateDecision::Valid => "success",
            AggregateDecision::Ambiguous => "ambiguous",
            AggregateDecision::Invalid => "rejected",
        };
        let validation = submission.entry.validation_record.clone();
        Self {
            status,
            fingerprint: submission.fingerprint,
            state: submission.state,
            drift_message: validation.as_ref().map(|r| r.drift_message()),
            validation,
            entry: submission.entry,
            block_index: submission.block_index,
            mined_block: submission.mined_block,
            duplicate: submission.duplicate,
        }
    }
}

/// POST /entry
pub async fn submit_entry(
    State(state): State<AppState>,
    body: Result<Json<EntryRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = parse_body(body)?;
    let options = SubmitOptions {
        validate: request.validate,
        auto_mine: request.auto_mine,
        deadline: request.deadline(),
        difficulty: request.difficulty,
    };

    let submission = state.submit(request.to_entry(), options).await?;
    let code = match submission.decision() {
        AggregateDecision::Valid => StatusCode::CREATED,
        AggregateDecision::Ambiguous => StatusCode::ACCEPTED,
        AggregateDecision::Invalid => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((code, Json(SubmitResponse::from(submission))).into_response())
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub decision: AggregateDecision,
    pub drift_message: &'static str,
    pub validation: ValidationRecord,
}

/// POST /entry/validate
pub async fn validate_entry(
    State(state): State<AppState>,
    body: Result<Json<EntryRequest>, JsonRejection>,
) -> ApiResult<Json<ValidateResponse>> {
    let request = parse_body(body)?;
    let record = state.validate_only(&request.to_entry(), request.deadline()).await?;
    Ok(Json(ValidateResponse {
        decision: record.aggregate_decision,
        drift_message: record.drift_message(),
        validation: record,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct MineRequest {
    #[serde(default)]
    pub difficulty: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct MineResponse {
    pub status: &'static str,
    pub block: Block,
}

/// POST /mine
pub async fn mine(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<MineResponse>)> {
    let request: MineRequest = parse_optional_body(&body)?;
    let block = state.mine(request.difficulty).await?;
    Ok((
        StatusCode::CREATED,
        Json(MineResponse {
            status: "success",
            block,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct ChainResponse {
    pub length: usize,
    pub chain: Vec<Block>,
    pub pending_entries: Vec<Entry>,
}

/// GET /chain
pub async fn chain(State(state): State<AppState>) -> ApiResult<Json<ChainResponse>> {
    let chain = state.chain().await?;
    Ok(Json(ChainResponse {
        length: chain.len(),
        chain,
        pending_entries: state.pending().await,
    }))
}

/// GET /validate/chain
pub async fn validate_chain(State(state): State<AppState>) -> ApiResult<Json<ChainReport>> {
    Ok(Json(state.validate_chain().await?))
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub count: usize,
    pub entries: Vec<Entry>,
}

/// GET /pending
pub async fn pending(State(state): State<AppState>) -> Json<PendingResponse> {
    let entries = state.pending().await;
    Json(PendingResponse {
        count: entries.len(),
        entries,
    })
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.health().await)
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<NodeStats>> {
    Ok(Json(state.stats().await?))
}

/// GET /block/:index
pub async fn block(State(state): State<AppState>, Path(index): Path<u64>) -> ApiResult<Json<Block>> {
    state
        .block(index)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Block {} not found", index)))
}

/// GET /blocks/latest
pub async fn latest_block(State(state): State<AppState>) -> ApiResult<Json<Block>> {
    state
        .latest_block()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Chain is empty".to_string()))
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub count: usize,
    pub entries: Vec<EntryLocation>,
}

impl From<Vec<EntryLocation>> for EntriesResponse {
    fn from(entries: Vec<EntryLocation>) -> Self {
        Self {
            count: entries.len(),
            entries,
        }
    }
}

/// GET /entries/author/:author
pub async fn entries_by_author(
    State(state): State<AppState>,
    Path(author): Path<String>,
) -> ApiResult<Json<EntriesResponse>> {
    Ok(Json(state.entries_by_author(&author).await?.into()))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub intent: Option<String>,
}

/// GET /entries/search?intent=
pub async fn search_entries(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<EntriesResponse>> {
    let intent = params
        .intent
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required query parameter: intent", None))?;
    Ok(Json(state.entries_by_intent(&intent).await?.into()))
}

/// GET /chain/narrative
pub async fn narrative(State(state): State<AppState>) -> ApiResult<String> {
    Ok(state.narrative().await?)
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub count: usize,
    pub records: Vec<AuditEntry>,
}

/// GET /audit?limit=
pub async fn audit(State(state): State<AppState>, Query(params): Query<AuditParams>) -> Json<AuditResponse> {
    let records = state.audit().recent(params.limit).await;
    Json(AuditResponse {
        count: records.len(),
        records,
    })
}

/// GET /audit/log?limit=
///
/// Reads the durable log, so it reaches past the in-memory window.
pub async fn audit_log(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<AuditResponse>> {
    let records = state.validation_log(params.limit).await?;
    Ok(Json(AuditResponse {
        count: records.len(),
        records,
    }))
}

fn asset_registry(state: &AppState) -> ApiResult<&AssetRegistry> {
    state
        .assets()
        .ok_or_else(|| ApiError::Forbidden("Asset tracking is disabled on this node".to_string()))
}

#[derive(Debug, Serialize)]
pub struct AssetResponse {
    pub asset_id: String,
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_transfer: Option<PendingTransfer>,
    pub history: Vec<TransferRecord>,
}

/// GET /assets/:asset_id
pub async fn asset(State(state): State<AppState>, Path(asset_id): Path<String>) -> ApiResult<Json<AssetResponse>> {
    let registry = asset_registry(&state)?;
    let owner = registry.owner(&asset_id);
    let pending_transfer = registry.pending_transfer(&asset_id);
    if owner.is_none() && pending_transfer.is_none() {
        return Err(ApiError::NotFound(format!("Asset '{}' not found", asset_id)));
    }
    Ok(Json(AssetResponse {
        history: registry.history(Some(&asset_id)),
        asset_id,
        owner,
        pending_transfer,
    }))
}

#[derive(Debug, Serialize)]
pub struct OwnerAssetsResponse {
    pub owner: String,
    pub count: usize,
    pub assets: Vec<String>,
}

/// GET /assets/owner/:owner
pub async fn assets_by_owner(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> ApiResult<Json<OwnerAssetsResponse>> {
    let assets = asset_registry(&state)?.assets_of(&owner);
    Ok(Json(OwnerAssetsResponse {
        count: assets.len(),
        owner,
        assets,
    }))
}

fn lineage_registry(state: &AppState) -> ApiResult<&LineageRegistry> {
    state
        .lineage()
        .ok_or_else(|| ApiError::Forbidden("Derivative tracking is disabled on this node".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct LineageParams {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

#[derive(Debug, Serialize)]
pub struct LinksResponse {
    pub entry: EntryRef,
    pub count: usize,
    pub links: Vec<LineageLink>,
}

impl LinksResponse {
    fn new(entry: EntryRef, links: Vec<LineageLink>) -> Self {
        Self {
            entry,
            count: links.len(),
            links,
        }
    }
}

/// GET /derivatives/types
pub async fn derivative_types() -> Json<Vec<&'static str>> {
    Json(DerivativeType::ALL.iter().map(DerivativeType::as_str).collect())
}

/// GET /derivatives/:block_index/:entry_index?recursive=&max_depth=
pub async fn derivatives(
    State(state): State<AppState>,
    Path((block_index, entry_index)): Path<(u64, usize)>,
    Query(params): Query<LineageParams>,
) -> ApiResult<Json<LinksResponse>> {
    let entry = EntryRef::new(block_index, entry_index);
    let links = lineage_registry(&state)?.derivatives(entry, params.recursive, params.max_depth);
    Ok(Json(LinksResponse::new(entry, links)))
}

/// GET /derivatives/:block_index/:entry_index/lineage?max_depth=
pub async fn lineage(
    State(state): State<AppState>,
    Path((block_index, entry_index)): Path<(u64, usize)>,
    Query(params): Query<LineageParams>,
) -> ApiResult<Json<LinksResponse>> {
    let entry = EntryRef::new(block_index, entry_index);
    let links = lineage_registry(&state)?.lineage(entry, params.max_depth);
    Ok(Json(LinksResponse::new(entry, links)))
}

/// GET /derivatives/:block_index/:entry_index/tree?max_depth=
pub async fn derivation_tree(
    State(state): State<AppState>,
    Path((block_index, entry_index)): Path<(u64, usize)>,
    Query(params): Query<LineageParams>,
) -> ApiResult<Json<DerivationTree>> {
    let entry = EntryRef::new(block_index, entry_index);
    Ok(Json(lineage_registry(&state)?.tree(entry, params.max_depth)))
}
