//! Video generation jobs.
//!
//! Same submit-then-poll lifecycle as images, with the video-specific
//! wrinkles: first/end frame reference uploads, a growing poll interval,
//! an alternate history endpoint probed periodically once polling drags
//! on, and an opportunistic scan of the raw response text for a result
//! URL the structured fields haven't surfaced yet.

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

/// Default public model name for video jobs.
pub const DEFAULT_MODEL: &str = "jimeng-video-3.0";
const DRAFT_VERSION: &str = "3.2.8";

/// Video jobs report a single processing status.
const PROCESSING_CODES: &[i64] = &[20];

const MODEL_MAP: &[(&str, &str)] = &[
    ("jimeng-video-3.0-pro", "dreamina_ic_generate_video_model_vgfm_3.0_pro"),
    ("jimeng-video-3.0", "dreamina_ic_generate_video_model_vgfm_3.0"),
    ("jimeng-video-3.0-fast", "dreamina_ic_generate_video_model_vgfm_3.0_fast"),
    ("jimeng-video-s2.0", "dreamina_ic_generate_video_model_vgfm_lite"),
    ("jimeng-video-2.0-pro", "dreamina_ic_generate_video_model_vgfm1.0"),
];

/// Ratios the video surface accepts.
const VIDEO_RATIOS: &[&str] = &["16:9", "9:16", "1:1", "4:3", "3:4", "21:9"];

/// Map a public video model name to the vendor's request key.
pub fn map_model(model: &str) -> &'static str {
    MODEL_MAP
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| MODEL_MAP.iter().find(|(name, _)| *name == DEFAULT_MODEL))
        .map(|(_, key)| *key)
        .expect("default model is always in the map")
}

/// Detect a supported ratio hinted in the prompt.
pub fn detect_video_ratio(prompt: &str) -> Option<&'static str> {
    let ratio_re = Regex::new(r"(\d+)\s*[:：]\s*(\d+)").expect("static regex");
    for caps in ratio_re.captures_iter(prompt) {
        let label = format!("{}:{}", &caps[1], &caps[2]);
        if let Some(found) = VIDEO_RATIOS.iter().find(|r| **r == label) {
            return Some(found);
        }
    }
    let keyword_map = [
        (r"横屏|横版|宽屏", "16:9"),
        (r"竖屏|竖版|手机", "9:16"),
        (r"方形|正方", "1:1"),
    ];
    for (pattern, label) in keyword_map {
        if Regex::new(pattern).expect("static regex").is_match(prompt) {
            return Some(label);
        }
    }
    None
}

/// Detect a 5s/10s duration hint in the prompt. Checks 10 first so
/// "10秒" never matches as 5.
pub fn detect_video_duration(prompt: &str) -> Option<u32> {
    if Regex::new(r"10\s*[秒sS]").expect("static regex").is_match(prompt) {
        return Some(10);
    }
    if Regex::new(r"5\s*[秒sS]").expect("static regex").is_match(prompt) {
        return Some(5);
    }
    None
}

/// Caller-facing options for one video job.
#[derive(Debug, Clone)]
pub struct VideoOptions {
    /// Explicit ratio; wins over any hint in the prompt.
    pub ratio: Option<String>,
    pub resolution: String,
    /// Explicit duration in seconds; wins over any hint in the prompt.
    pub duration: Option<u32>,
    /// First frame and (optionally) end frame reference images.
    pub frames: Vec<FileSource>,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            ratio: None,
            resolution: "720p".to_string(),
            duration: None,
            frames: Vec::new(),
        }
    }
}

/// Resolve ratio with the canonical precedence: explicit parameter, then
/// prompt hint, then 16:9.
fn resolve_ratio(explicit: Option<&str>, prompt: &str) -> &'static str {
    if let Some(label) = explicit {
        if let Some(found) = VIDEO_RATIOS.iter().find(|r| **r == label) {
            return found;
        }
        warn!(ratio = label, "unsupported video ratio, falling back");
    }
    detect_video_ratio(prompt).unwrap_or("16:9")
}

/// Resolve duration: 2.0-series models only render 5 s; 3.0-series honor
/// an explicit 5/10, then a prompt hint, then default to 10.
fn resolve_duration(model: &str, explicit: Option<u32>, prompt: &str) -> u32 {
    if !model.contains("3.0") {
        if explicit.is_some_and(|d| d != 5) {
            info!("2.0-series models render 5s only, adjusting duration");
        }
        return 5;
    }
    match explicit {
        Some(d) if d == 5 || d == 10 => d,
        Some(other) => {
            warn!(duration = other, "unsupported duration, using prompt hint or default");
            detect_video_duration(prompt).unwrap_or(10)
        }
        None => detect_video_duration(prompt).unwrap_or(10),
    }
}

/// Video job runner.
#[derive(Debug, Clone)]
pub struct VideoGenerator {
    api: ApiClient,
    uploader: UploadPipeline,
}

impl VideoGenerator {
    pub fn new(api: ApiClient, uploader: UploadPipeline) -> Self {
        Self { api, uploader }
    }

    /// Run one video job and return the result media URL.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: VideoOptions,
        credential: &Credential,
    ) -> Result<String> {
        let model_key = map_model(model);
        let ratio = resolve_ratio(options.ratio.as_deref(), prompt);
        let duration = resolve_duration(model, options.duration, prompt);
        let duration_ms = duration * 1000;
        info!(
            model,
            model_key,
            ratio,
            resolution = %options.resolution,
            duration_ms,
            "starting video job"
        );

        let info = credit::get_credit(&self.api, credential).await?;
        if info.total_credit <= 0 {
            if let Err(err) = credit::receive_credit(&self.api, credential).await {
                warn!(error = %err, "daily credit claim failed");
            }
        }

        let (first_frame, end_frame) = self.upload_frames(&options.frames, credential).await?;

        let history_id = self
            .submit(
                model_key,
                prompt,
                &options.resolution,
                ratio,
                duration_ms,
                first_frame,
                end_frame,
                credential,
            )
            .await?;
        self.poll(&history_id, credential).await
    }

    /// Upload up to two reference frames. The first frame is required
    /// when present: its upload failure is fatal. A failed end-frame
    /// upload is dropped.
    async fn upload_frames(
        &self,
        frames: &[FileSource],
        credential: &Credential,
    ) -> Result<(Option<Value>, Option<Value>)> {
        let mut uris: Vec<String> = Vec::new();
        for (index, frame) in frames.iter().take(2).enumerate() {
            match self.uploader.upload(credential, frame.clone()).await {
                Ok(uploaded) => uris.push(uploaded.image_uri),
                Err(err) if index == 0 => {
                    return Err(JimengError::request_failed(format!(
                        "first frame upload failed: {err}"
                    )))
                }
                Err(err) => warn!(error = %err, "end frame upload failed, continuing without it"),
            }
        }
        let frame_payload = |uri: &String| {
            json!({
                "format": "",
                "height": 1024,
                "id": Uuid::new_v4().to_string(),
                "image_uri": uri,
                "name": "",
                "platform_type": 1,
                "source_from": "upload",
                "type": "image",
                "uri": uri,
                "width": 1024,
            })
        };
        Ok((
            uris.first().map(frame_payload),
            uris.get(1).map(frame_payload),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit(
        &self,
        model_key: &str,
        prompt: &str,
        resolution: &str,
        ratio: &str,
        duration_ms: u32,
        first_frame: Option<Value>,
        end_frame: Option<Value>,
        credential: &Credential,
    ) -> Result<String> {
        let component_id = Uuid::new_v4().to_string();
        let metrics_extra = json!({
            "enterFrom": "click",
            "isDefaultSeed": 1,
            "promptSource": "custom",
            "isRegenerate": false,
            "originSubmitId": Uuid::new_v4().to_string(),
        })
        .to_string();
        let commerce_info = json!({
            "benefit_type": "basic_video_operation_vgfm_v_three",
            "resource_id": "generate_video",
            "resource_id_type": "str",
            "resource_sub_type": "aigc",
        });
        let seed: u64 = rand::thread_rng().gen_range(2_500_000_000..2_600_000_000);

        let draft_content = json!({
            "type": "draft",
            "id": Uuid::new_v4().to_string(),
            "min_version": "3.0.5",
            "is_from_tsn": true,
            "version": DRAFT_VERSION,
            "main_component_id": &component_id,
            "component_list": [{
                "type": "video_base_component",
                "id": &component_id,
                "min_version": "1.0.0",
                "metadata": {
                    "type": "",
                    "id": Uuid::new_v4().to_string(),
                    "created_platform": 3,
                    "created_platform_version": "",
                    "created_time_in_ms": chrono::Utc::now().timestamp_millis(),
                    "created_did": "",
                },
                "generate_type": "gen_video",
                "aigc_mode": "workbench",
                "abilities": {
                    "type": "",
                    "id": Uuid::new_v4().to_string(),
                    "gen_video": {
                        "id": Uuid::new_v4().to_string(),
                        "type": "",
                        "text_to_video_params": {
                            "type": "",
                            "id": Uuid::new_v4().to_string(),
                            "model_req_key": model_key,
                            "priority": 0,
                            "seed": seed,
                            "video_aspect_ratio": ratio,
                            "video_gen_inputs": [{
                                "duration_ms": duration_ms,
                                "first_frame_image": first_frame,
                                "end_frame_image": end_frame,
                                "fps": 24,
                                "id": Uuid::new_v4().to_string(),
                                "min_version": "3.0.5",
                                "prompt": prompt,
                                "resolution": resolution,
                                "type": "",
                                "video_mode": 2,
                            }],
                        },
                        "video_task_extra": &metrics_extra,
                    },
                },
            }],
        });

        let data = self
            .api
            .send(
                Method::POST,
                "/mweb/v1/aigc_draft/generate",
                credential,
                RequestOptions::new()
                    .param("aigc_features", "app_lip_sync")
                    .param("web_version", "6.6.0")
                    .param("da_version", DRAFT_VERSION)
                    .param("web_component_open_flag", "1")
                    .json(json!({
                        "extend": {
                            "root_model": model_key,
                            "m_video_commerce_info": &commerce_info,
                            "m_video_commerce_info_list": [&commerce_info],
                        },
                        "submit_id": Uuid::new_v4().to_string(),
                        "metrics_extra": metrics_extra,
                        "draft_content": draft_content.to_string(),
                        "http_common_info": { "aid": APP_ID },
                    })),
            )
            .await?;

        data.pointer("/aigc_data/history_record_id")
            .and_then(|id| match id {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| JimengError::GenerationFailed("missing history record id".to_string()))
    }

    async fn poll(&self, history_id: &str, credential: &Credential) -> Result<String> {
        let poll_config = self.api.config().video_poll.clone();
        tokio::time::sleep(poll_config.initial_delay).await;
        info!(history_id, "polling video job");

        let mut polls = 0u32;
        loop {
            // Once polling drags on, probe the alternate records endpoint
            // every other attempt as a fallback path.
            let use_alternate = polls > 10 && polls % 2 == 0;
            let data = if use_alternate {
                self.api
                    .send(
                        Method::POST,
                        "/mweb/v1/get_history_records",
                        credential,
                        RequestOptions::new()
                            .json(json!({ "history_record_ids": [history_id] })),
                    )
                    .await?
            } else {
                self.api
                    .send(
                        Method::POST,
                        "/mweb/v1/get_history_by_ids",
                        credential,
                        RequestOptions::new().json(json!({ "history_ids": [history_id] })),
                    )
                    .await?
            };
            polls += 1;

            // Last-resort extraction: the result URL sometimes shows up
            // in the raw text before the structured fields carry it.
            if let Some(url) = scan_for_video_url(&data.to_string()) {
                info!(history_id, "result URL found by raw scan");
                return Ok(url);
            }

            let Some(record) = video_record(&data, history_id, use_alternate) else {
                debug!(polls, "history record not visible yet");
                if polls >= poll_config.budget {
                    return Err(JimengError::GenerationTimeout { attempts: polls });
                }
                tokio::time::sleep(poll::delay_for_missing_record(&poll_config, polls - 1)).await;
                continue;
            };

            let item_list = record
                .get("item_list")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if let Some(url) = extract_video_url(&item_list) {
                return Ok(url);
            }

            let observation = PollObservation {
                status: record.get("status").and_then(Value::as_i64).unwrap_or(0),
                fail_code: record.get("fail_code").map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
                has_result: false,
            };
            debug!(status = observation.status, polls, "video poll tick");

            match poll::step(
                PROCESSING_CODES,
                &observation,
                poll_config.budget.saturating_sub(polls),
            ) {
                Transition::Continue => {
                    tokio::time::sleep(poll::delay_for_attempt(&poll_config, polls - 1)).await;
                }
                Transition::Failed { fail_code } => {
                    return Err(poll::terminal_error(fail_code.as_deref()))
                }
                Transition::TimedOut => {
                    return Err(JimengError::GenerationTimeout { attempts: polls })
                }
                // Terminal status without a URL in any candidate field.
                Transition::Finished => {
                    return Err(JimengError::GenerationFailed(
                        "job finished without a result URL".to_string(),
                    ))
                }
            }
        }
    }
}

/// Locate the history record in either endpoint's response shape.
fn video_record<'a>(data: &'a Value, history_id: &str, alternate: bool) -> Option<&'a Value> {
    if alternate {
        if let Some(record) = data.pointer("/history_records/0") {
            return Some(record);
        }
    }
    data.get(history_id)
        .or_else(|| data.pointer("/history_list/0"))
}

/// Ordered candidate fields for the result URL.
fn extract_video_url(item_list: &[Value]) -> Option<String> {
    let item = item_list.first()?;
    [
        "/video/transcoded_video/origin/video_url",
        "/video/play_url",
        "/video/download_url",
        "/video/url",
    ]
    .iter()
    .find_map(|pointer| {
        item.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    })
}

/// Scan raw response text for a directly embedded result URL.
fn scan_for_video_url(text: &str) -> Option<String> {
    let re = Regex::new(r#"https://v[0-9]+-artist\.vlabvod\.com/[^"\\\s]+"#)
        .expect("static regex");
    re.find(text).map(|m| m.as_str().to_string())
}
