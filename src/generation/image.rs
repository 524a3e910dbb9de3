//! Image generation jobs.
//!
//! Submits an `aigc_draft/generate` draft and polls
//! `get_history_by_ids` until result items appear. Two job shapes exist:
//! plain generation, and blend mode when a reference image is supplied
//! (the reference is uploaded first and the whole call fails if that
//! upload fails).

use rand::Rng;
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::APP_ID;
use crate::credential::Credential;
use crate::credit;
use crate::error::{JimengError, Result};
use crate::http::{ApiClient, RequestOptions};
use crate::upload::{FileSource, UploadPipeline};

use super::poll::{self, PollObservation, Transition};

/// Requested model name falling back to the current default mapping.
pub const DEFAULT_MODEL: &str = "jimeng-4.5";
/// Blend mode pins an older model; the newer ones reject byte_edit.
const BLEND_MODEL: &str = "jimeng-3.0";
const DRAFT_VERSION: &str = "3.0.2";
const DRAFT_MIN_VERSION: &str = "3.0.2";

/// Status codes the vendor reports while an image job is still running.
const PROCESSING_CODES: &[i64] = &[20, 42, 45];

const MODEL_MAP: &[(&str, &str)] = &[
    ("jimeng-4.5", "high_aes_general_v40l"),
    ("jimeng-4.1", "high_aes_general_v41"),
    ("jimeng-4.0", "high_aes_general_v40"),
    ("jimeng-3.1", "high_aes_general_v30l_art_fangzhou:general_v3.0_18b"),
    ("jimeng-3.0", "high_aes_general_v30l:general_v3.0_18b"),
];

/// Map a public model name to the vendor's request key.
pub fn map_model(model: &str) -> &'static str {
    MODEL_MAP
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| MODEL_MAP.iter().find(|(name, _)| *name == DEFAULT_MODEL))
        .map(|(_, key)| *key)
        .expect("default model is always in the map")
}

/// One supported aspect-ratio tier with its fixed output dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub label: &'static str,
    pub code: u8,
    pub width: u32,
    pub height: u32,
}

const ASPECT_RATIOS: &[AspectRatio] = &[
    AspectRatio { label: "21:9", code: 0, width: 1512, height: 648 },
    AspectRatio { label: "16:9", code: 1, width: 1360, height: 765 },
    AspectRatio { label: "3:2", code: 2, width: 1360, height: 907 },
    AspectRatio { label: "4:3", code: 3, width: 1360, height: 1020 },
    AspectRatio { label: "1:1", code: 8, width: 1024, height: 1024 },
    AspectRatio { label: "3:4", code: 4, width: 1020, height: 1360 },
    AspectRatio { label: "2:3", code: 5, width: 907, height: 1360 },
    AspectRatio { label: "9:16", code: 6, width: 765, height: 1360 },
];

/// Look up a tier by its `W:H` label.
pub fn aspect_ratio(label: &str) -> Option<AspectRatio> {
    ASPECT_RATIOS.iter().copied().find(|r| r.label == label)
}

/// Detect an aspect ratio hinted inside the prompt text.
///
/// Recognizes `W:H` with an ASCII or full-width colon, plus the common
/// Chinese orientation keywords. Used only when the caller gave no
/// explicit ratio.
pub fn detect_aspect_ratio(prompt: &str) -> Option<AspectRatio> {
    let ratio_re = Regex::new(r"(\d+)\s*[:：]\s*(\d+)").expect("static regex");
    for caps in ratio_re.captures_iter(prompt) {
        let label = format!("{}:{}", &caps[1], &caps[2]);
        if let Some(found) = aspect_ratio(&label) {
            debug!(ratio = found.label, "detected aspect ratio in prompt");
            return Some(found);
        }
    }
    let keyword_map = [
        (r"横屏|横版|宽屏", "16:9"),
        (r"竖屏|竖版|手机", "9:16"),
        (r"方形|正方", "1:1"),
    ];
    for (pattern, label) in keyword_map {
        let re = Regex::new(pattern).expect("static regex");
        if re.is_match(prompt) {
            debug!(ratio = label, "detected orientation keyword in prompt");
            return aspect_ratio(label);
        }
    }
    None
}

/// Caller-facing options for one image job.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Explicit `W:H` ratio; wins over any hint in the prompt.
    pub ratio: Option<String>,
    pub sample_strength: f64,
    pub negative_prompt: String,
    /// Optional reference image switching the job to blend mode.
    pub reference: Option<FileSource>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            ratio: None,
            sample_strength: 0.5,
            negative_prompt: String::new(),
            reference: None,
        }
    }
}

/// The two job-description shapes the draft endpoint accepts.
#[derive(Debug, Clone)]
enum Abilities {
    Generate,
    Blend { reference_uri: String },
}

impl Abilities {
    fn generate_type(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Blend { .. } => "blend",
        }
    }

    /// Build the nested `abilities` payload for this job shape.
    fn to_payload(
        &self,
        model_key: &str,
        prompt: &str,
        negative_prompt: &str,
        sample_strength: f64,
        ratio: AspectRatio,
    ) -> Value {
        match self {
            Self::Generate => {
                let seed: u64 = rand::thread_rng().gen_range(2_500_000_000..2_600_000_000);
                json!({
                    "type": "",
                    "id": Uuid::new_v4().to_string(),
                    "generate": {
                        "type": "",
                        "id": Uuid::new_v4().to_string(),
                        "core_param": {
                            "type": "",
                            "id": Uuid::new_v4().to_string(),
                            "model": model_key,
                            "prompt": prompt,
                            "negative_prompt": negative_prompt,
                            "seed": seed,
                            "sample_strength": sample_strength,
                            "image_ratio": ratio.code,
                            "large_image_info": {
                                "type": "",
                                "id": Uuid::new_v4().to_string(),
                                "height": ratio.height,
                                "width": ratio.width,
                            },
                        },
                        "history_option": {
                            "type": "",
                            "id": Uuid::new_v4().to_string(),
                        },
                    },
                })
            }
            Self::Blend { reference_uri } => json!({
                "type": "",
                "id": Uuid::new_v4().to_string(),
                "blend": {
                    "type": "",
                    "id": Uuid::new_v4().to_string(),
                    "min_features": [],
                    "core_param": {
                        "type": "",
                        "id": Uuid::new_v4().to_string(),
                        "model": model_key,
                        // Blend prompts carry a trailing marker.
                        "prompt": format!("{prompt}##"),
                        "sample_strength": sample_strength,
                        "image_ratio": ratio.code,
                        "large_image_info": {
                            "type": "",
                            "id": Uuid::new_v4().to_string(),
                            "height": ratio.height,
                            "width": ratio.width,
                            "resolution_type": "1k",
                        },
                    },
                    "ability_list": [{
                        "type": "",
                        "id": Uuid::new_v4().to_string(),
                        "name": "byte_edit",
                        "image_uri_list": [reference_uri],
                        "image_list": [{
                            "type": "image",
                            "id": Uuid::new_v4().to_string(),
                            "source_from": "upload",
                            "platform_type": 1,
                            "name": "",
                            "image_uri": reference_uri,
                            "width": 0,
                            "height": 0,
                            "format": "",
                            "uri": reference_uri,
                        }],
                        "strength": 0.5,
                    }],
                    "history_option": {
                        "type": "",
                        "id": Uuid::new_v4().to_string(),
                    },
                    "prompt_placeholder_info_list": [{
                        "type": "",
                        "id": Uuid::new_v4().to_string(),
                        "ability_index": 0,
                    }],
                    "postedit_param": {
                        "type": "",
                        "id": Uuid::new_v4().to_string(),
                        "generate_type": 0,
                    },
                },
            }),
        }
    }

    fn babi_param(&self, model_key: &str) -> Value {
        match self {
            Self::Generate => json!({
                "scenario": "image_video_generation",
                "feature_key": "aigc_to_image",
                "feature_entrance": "to_image",
                "feature_entrance_detail": format!("to_image-{model_key}"),
            }),
            Self::Blend { .. } => json!({
                "scenario": "image_video_generation",
                "feature_key": "to_image_referenceimage_generate",
                "feature_entrance": "to_image",
                "feature_entrance_detail": "to_image-referenceimage-byte_edit",
            }),
        }
    }
}

/// Image job runner: upload (optional) → submit → poll → extract.
#[derive(Debug, Clone)]
pub struct ImageGenerator {
    api: ApiClient,
    uploader: UploadPipeline,
}

impl ImageGenerator {
    pub fn new(api: ApiClient, uploader: UploadPipeline) -> Self {
        Self { api, uploader }
    }

    /// Run one image job and return one URL per result item (an item
    /// without any resolvable URL yields `None`).
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: ImageOptions,
        credential: &Credential,
    ) -> Result<Vec<Option<String>>> {
        // Reference upload happens before anything else; its failure
        // aborts the call without submitting.
        let abilities = match &options.reference {
            Some(source) => {
                info!("reference image present, switching to blend mode");
                let uploaded = self.uploader.upload(credential, source.clone()).await?;
                Abilities::Blend {
                    reference_uri: uploaded.image_uri,
                }
            }
            None => Abilities::Generate,
        };

        let ratio = resolve_ratio(options.ratio.as_deref(), prompt)?;
        let model_name = match abilities {
            Abilities::Blend { .. } => BLEND_MODEL,
            Abilities::Generate => model,
        };
        let model_key = map_model(model_name);
        info!(
            model = model_name,
            model_key,
            ratio = ratio.label,
            width = ratio.width,
            height = ratio.height,
            mode = abilities.generate_type(),
            "starting image job"
        );

        self.precheck_balance(credential).await?;

        let history_id = self
            .submit(&abilities, model_key, prompt, &options, ratio, credential)
            .await?;
        self.poll(&history_id, credential).await
    }

    /// Query the balance and claim the daily credits when empty. The
    /// claim is best-effort: a failure is logged, not fatal.
    async fn precheck_balance(&self, credential: &Credential) -> Result<()> {
        let info = credit::get_credit(&self.api, credential).await?;
        if info.total_credit <= 0 {
            if let Err(err) = credit::receive_credit(&self.api, credential).await {
                warn!(error = %err, "daily credit claim failed");
            }
        }
        Ok(())
    }

    async fn submit(
        &self,
        abilities: &Abilities,
        model_key: &str,
        prompt: &str,
        options: &ImageOptions,
        ratio: AspectRatio,
        credential: &Credential,
    ) -> Result<String> {
        let component_id = Uuid::new_v4().to_string();
        let metrics_extra = match abilities {
            Abilities::Generate => Some(
                json!({
                    "templateId": "",
                    "generateCount": 1,
                    "promptSource": "custom",
                    "templateSource": "",
                    "lastRequestId": "",
                    "originRequestId": "",
                })
                .to_string(),
            ),
            Abilities::Blend { .. } => None,
        };

        let draft_content = json!({
            "type": "draft",
            "id": Uuid::new_v4().to_string(),
            "min_version": DRAFT_MIN_VERSION,
            "is_from_tsn": true,
            "version": "3.2.2",
            "main_component_id": &component_id,
            "component_list": [{
                "type": "image_base_component",
                "id": &component_id,
                "min_version": DRAFT_VERSION,
                "metadata": {
                    "type": "",
                    "id": Uuid::new_v4().to_string(),
                    "created_platform": 3,
                    "created_platform_version": "",
                    "created_time_in_ms": chrono::Utc::now().timestamp_millis(),
                    "created_did": "",
                },
                "generate_type": abilities.generate_type(),
                "aigc_mode": "workbench",
                "abilities": abilities.to_payload(
                    model_key,
                    prompt,
                    &options.negative_prompt,
                    options.sample_strength,
                    ratio,
                ),
            }],
        });

        let mut body = json!({
            "extend": {
                "root_model": model_key,
                "template_id": "",
            },
            "submit_id": Uuid::new_v4().to_string(),
            "draft_content": draft_content.to_string(),
            "http_common_info": { "aid": APP_ID },
        });
        if let Some(metrics) = metrics_extra {
            body["metrics_extra"] = Value::String(metrics);
        }

        let babi_param =
            urlencoding::encode(&abilities.babi_param(model_key).to_string()).into_owned();
        let data = self
            .api
            .send(
                Method::POST,
                "/mweb/v1/aigc_draft/generate",
                credential,
                RequestOptions::new()
                    .param("babi_param", babi_param)
                    .json(body),
            )
            .await?;

        history_id_from(&data)
            .ok_or_else(|| JimengError::GenerationFailed("missing history record id".to_string()))
    }

    async fn poll(
        &self,
        history_id: &str,
        credential: &Credential,
    ) -> Result<Vec<Option<String>>> {
        let poll_config = self.api.config().image_poll.clone();
        let mut polls = 0u32;

        loop {
            tokio::time::sleep(poll::delay_for_attempt(&poll_config, polls)).await;
            polls += 1;

            let data = self.query_status(history_id, credential).await?;
            let record = data.get(history_id).ok_or_else(|| {
                JimengError::GenerationFailed(format!("history record {history_id} not found"))
            })?;

            let item_list = record
                .get("item_list")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let observation = PollObservation {
                status: record.get("status").and_then(Value::as_i64).unwrap_or(0),
                fail_code: fail_code_from(record),
                has_result: !item_list.is_empty(),
            };
            debug!(
                status = observation.status,
                items = item_list.len(),
                polls,
                "image poll tick"
            );

            match poll::step(
                PROCESSING_CODES,
                &observation,
                poll_config.budget.saturating_sub(polls),
            ) {
                Transition::Continue => continue,
                Transition::Finished => return Ok(extract_image_urls(&item_list)),
                Transition::Failed { fail_code } => {
                    return Err(poll::terminal_error(fail_code.as_deref()))
                }
                Transition::TimedOut => {
                    return Err(JimengError::GenerationTimeout { attempts: polls })
                }
            }
        }
    }

    async fn query_status(&self, history_id: &str, credential: &Credential) -> Result<Value> {
        self.api
            .send(
                Method::POST,
                "/mweb/v1/get_history_by_ids",
                credential,
                RequestOptions::new().json(json!({
                    "history_ids": [history_id],
                    "image_info": {
                        "width": 2048,
                        "height": 2048,
                        "format": "webp",
                        "image_scene_list": image_scene_list(),
                    },
                    "http_common_info": { "aid": APP_ID },
                })),
            )
            .await
    }
}

/// Resolve the ratio tier: explicit option wins, prompt detection is the
/// fallback, 1:1 is the default.
fn resolve_ratio(explicit: Option<&str>, prompt: &str) -> Result<AspectRatio> {
    if let Some(label) = explicit {
        return aspect_ratio(label).ok_or_else(|| {
            JimengError::InvalidInput(format!("unsupported aspect ratio {label}"))
        });
    }
    Ok(detect_aspect_ratio(prompt)
        .unwrap_or_else(|| aspect_ratio("1:1").expect("1:1 is always in the table")))
}

/// History ids arrive as strings or numbers depending on the endpoint.
fn history_id_from(data: &Value) -> Option<String> {
    let id = data.get("aigc_data")?.get("history_record_id")?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn fail_code_from(record: &Value) -> Option<String> {
    match record.get("fail_code")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Per-item URL extraction: full-resolution large image first, cover URL
/// as the fallback.
fn extract_image_urls(item_list: &[Value]) -> Vec<Option<String>> {
    item_list
        .iter()
        .map(|item| {
            item.pointer("/image/large_images/0/image_url")
                .and_then(Value::as_str)
                .or_else(|| item.pointer("/common_attr/cover_url").and_then(Value::as_str))
                .map(str::to_string)
        })
        .collect()
}

/// The render sizes the web client asks the vendor to precompute.
fn image_scene_list() -> Value {
    let smart_crop = [
        (360, 360),
        (480, 480),
        (720, 720),
        (720, 480),
        (360, 240),
        (240, 320),
        (480, 640),
    ];
    let normal = [(2400, "2400"), (1080, "1080"), (720, "720"), (480, "480"), (360, "360")];

    let mut scenes: Vec<Value> = smart_crop
        .iter()
        .map(|(w, h)| {
            json!({
                "scene": "smart_crop",
                "width": w,
                "height": h,
                "uniq_key": format!("smart_crop-w:{w}-h:{h}"),
                "format": "webp",
            })
        })
        .collect();
    scenes.extend(normal.iter().map(|(size, key)| {
        json!({
            "scene": "normal",
            "width": size,
            "height": size,
            "uniq_key": key,
            "format": "webp",
        })
    }));
    Value::Array(scenes)
}
