//! Multi-hop generation pipeline.
//!
//! Pipeline flow:
//! Chunks → k-chunk groupings → Calls → Dispatcher (every endpoint) → JSONL
//!
//! Epistemic foundation:
//! - K_i: Each grouping is a distinct k-subset of the input chunks
//! - K_i: Output records follow endpoint order, then grouping order
//! - B_i: Some units fail → recorded as failed, never abort the run
//! - I^R: User chooses hops, samples, seed and endpoints

use crate::dispatch::{Backoff, Dispatcher, Executor};
use crate::metrics::{FanoutSink, MetricsSink, ProgressSink, UsageLedger};
use crate::models::{
    Call, Chunk, Config, Endpoint, FanoutError, GenerationConfig, GenerationRecord, Outcome,
    RecordStatus, Result, RunStats,
};
use crate::sampler::{binomial, sample_exact_combinations};
use chrono::Utc;
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Placeholder in the user template replaced by the grouped chunk texts.
pub const CHUNKS_PLACEHOLDER: &str = "{chunks}";

/// How a grouping of chunks becomes a chat payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub system: Option<String>,
    pub user: String,
    pub tags: Vec<String>,
}

impl PromptTemplate {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Template from `[generation]`, reading the system prompt file if set.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let system = match &config.system_prompt {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .map_err(|e| FanoutError::io("reading system prompt", e))?,
            ),
            None => None,
        };

        Ok(Self {
            system,
            user: config.user_template.clone(),
            tags: config.tags.clone(),
        })
    }

    fn render(&self, group: &[Chunk]) -> String {
        let texts: Vec<&str> = group.iter().map(|c| c.text.as_str()).collect();
        self.user.replace(CHUNKS_PLACEHOLDER, &texts.join("\n\n"))
    }
}

/// Load chunks from a JSONL file.
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let file = File::open(path).map_err(|e| FanoutError::io("opening chunks file", e))?;
    let reader = BufReader::new(file);
    let mut chunks = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FanoutError::io("reading chunks file", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line)
            .map_err(|e| FanoutError::ParseError(format!("Line {}: {}", line_num + 1, e)))?;
        chunks.push(chunk);
    }

    info!(count = chunks.len(), "Loaded chunks");
    Ok(chunks)
}

/// Group chunks into `hops`-sized groupings.
///
/// `hops == 1` keeps input order (first `samples` chunks). Larger hops draw
/// distinct combinations uniformly; `samples` defaults to the chunk count and
/// is clamped to C(n, hops).
pub fn group_chunks<R>(
    chunks: &[Chunk],
    hops: usize,
    samples: Option<usize>,
    rng: &mut R,
) -> Result<Vec<Vec<Chunk>>>
where
    R: Rng + ?Sized,
{
    if hops == 0 {
        return Err(FanoutError::invalid("hops must be positive"));
    }

    if hops == 1 {
        let take = samples.unwrap_or(chunks.len()).min(chunks.len());
        return Ok(chunks[..take].iter().map(|c| vec![c.clone()]).collect());
    }

    if hops > chunks.len() {
        return Err(FanoutError::invalid(format!(
            "cannot group {} chunks into {hops}-chunk groupings",
            chunks.len()
        )));
    }

    let requested = samples.unwrap_or(chunks.len());
    let count = match usize::try_from(&binomial(chunks.len(), hops)) {
        Ok(available) if available < requested => {
            warn!(
                requested,
                available,
                hops,
                "Fewer distinct groupings than requested, clamping"
            );
            available
        }
        _ => requested,
    };

    sample_exact_combinations(chunks, hops, count, rng)
}

/// Build the call for one grouping.
///
/// The call id is the chunk ids joined by `+`.
pub fn build_call(group: &[Chunk], template: &PromptTemplate) -> Call {
    let id = group
        .iter()
        .map(|c| c.id.as_str())
        .collect::<Vec<_>>()
        .join("+");

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &template.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": template.render(group)}));

    Call::new(id, json!({ "messages": messages }))
        .with_tag(format!("hops:{}", group.len()))
        .with_tags(template.tags.iter().cloned())
}

/// Write groupings as JSONL without dispatching anything.
pub fn write_groupings(groups: &[Vec<Chunk>], output_path: &Path) -> Result<usize> {
    let file = File::create(output_path).map_err(|e| FanoutError::io("creating output file", e))?;
    let mut writer = BufWriter::new(file);

    for group in groups {
        let line = json!({
            "chunk_ids": group.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            "chunks": group,
        });
        writeln!(writer, "{line}").map_err(|e| FanoutError::io("writing output", e))?;
    }

    writer
        .flush()
        .map_err(|e| FanoutError::io("flushing output", e))?;
    Ok(groups.len())
}

/// Samples chunk groupings and sends each one to every selected endpoint.
pub struct MultiHopPipeline {
    config: Config,
    endpoints: Vec<Endpoint>,
    executor: Arc<dyn Executor>,
    template: PromptTemplate,
    backoff: Backoff,
    show_progress: bool,
}

impl MultiHopPipeline {
    /// Create a new pipeline from configuration.
    pub fn new(config: Config, endpoints: Vec<Endpoint>, executor: Arc<dyn Executor>) -> Result<Self> {
        let template = PromptTemplate::from_config(&config.generation)?;
        let backoff = Backoff::from_config(&config.dispatch);

        Ok(Self {
            config,
            endpoints,
            executor,
            template,
            backoff,
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    fn rng(&self) -> StdRng {
        match self.config.sampling.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Run the pipeline.
    pub async fn run(&self, chunks: Vec<Chunk>, output_path: &Path) -> Result<RunStats> {
        let start = Instant::now();
        let sampling = &self.config.sampling;

        let groups = group_chunks(&chunks, sampling.hops, sampling.samples, &mut self.rng())?;
        let calls: Vec<Call> = groups
            .iter()
            .map(|group| build_call(group, &self.template))
            .collect();
        let total_units = calls.len() * self.endpoints.len();

        info!(
            total_chunks = chunks.len(),
            hops = sampling.hops,
            calls = calls.len(),
            endpoints = self.endpoints.len(),
            "Starting multi-hop pipeline"
        );

        let ledger = Arc::new(UsageLedger::from_config(&self.config));
        let progress = Arc::new(if self.show_progress {
            ProgressSink::new(total_units as u64)
        } else {
            ProgressSink::with_bar(ProgressBar::hidden())
        });
        let sink = Arc::new(
            FanoutSink::new()
                .with(ledger.clone())
                .with(progress.clone()),
        );

        let result = Dispatcher::new(Arc::clone(&self.executor))
            .with_sink(sink.clone())
            .with_backoff(self.backoff)
            .dispatch(&self.endpoints, &calls)
            .await?;

        let mut stats = RunStats {
            total_chunks: chunks.len(),
            total_calls: calls.len(),
            total_units,
            succeeded: result.success_count(),
            failed: result.failure_count(),
            ..Default::default()
        };

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| FanoutError::io("creating output directory", e))?;
        }
        let output_file =
            File::create(output_path).map_err(|e| FanoutError::io("creating output file", e))?;
        let mut writer = BufWriter::new(output_file);

        for endpoint in &self.endpoints {
            let Some(outcomes) = result.get(endpoint.name()) else {
                continue;
            };
            for ((group, call), outcome) in groups.iter().zip(&calls).zip(outcomes) {
                if !outcome.is_success() && !self.config.output.include_failed {
                    continue;
                }
                let record = generation_record(endpoint, group, call, outcome);
                let json = serde_json::to_string(&record)?;
                writeln!(writer, "{json}").map_err(|e| FanoutError::io("writing output", e))?;
                stats.written += 1;
            }
        }

        writer
            .flush()
            .map_err(|e| FanoutError::io("flushing output", e))?;
        sink.flush()?;

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            written = stats.written,
            success_rate = format!("{:.1}%", stats.success_rate * 100.0),
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            cost = format!("${:.4}", ledger.total_cost_usd()),
            "Multi-hop pipeline complete"
        );

        Ok(stats)
    }
}

fn generation_record(
    endpoint: &Endpoint,
    group: &[Chunk],
    call: &Call,
    outcome: &Outcome,
) -> GenerationRecord {
    let (status, output, model, input_size, output_size, error) = match outcome {
        Outcome::Success(response) => (
            RecordStatus::Succeeded,
            response.content.clone(),
            response.model.clone(),
            response.input_size,
            response.output_size,
            None,
        ),
        Outcome::Failed(failure) => (
            RecordStatus::Failed,
            String::new(),
            None,
            0,
            0,
            Some(failure.last_error.clone()),
        ),
    };

    GenerationRecord {
        id: Uuid::new_v4().to_string(),
        call_id: call.id.clone(),
        endpoint: endpoint.name().to_string(),
        chunk_ids: group.iter().map(|c| c.id.clone()).collect(),
        status,
        output,
        model,
        input_size,
        output_size,
        error,
        tags: call.tags.iter().cloned().collect(),
        generated_at: Utc::now(),
        metadata: group
            .iter()
            .filter(|c| !c.metadata.is_null())
            .map(|c| c.metadata.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutorError, Response};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::time::Duration;
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    fn corpus(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| chunk(&format!("c{i}"), &format!("text {i}")))
            .collect()
    }

    /// Echoes the user message; fails any call whose id mentions `c0`.
    struct ScriptedExecutor;

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, endpoint: &Endpoint, call: &Call) -> std::result::Result<Response, ExecutorError> {
            if call.id.split('+').any(|id| id == "c0") {
                return Err(ExecutorError::Api {
                    status: 400,
                    message: "rejected".to_string(),
                });
            }
            let messages = call.payload["messages"].as_array().unwrap();
            let user = messages.last().unwrap()["content"].as_str().unwrap();
            Ok(Response::new(format!("{}|{user}", endpoint.name())).with_usage(10, 5))
        }
    }

    fn config(hops: usize, samples: Option<usize>, include_failed: bool) -> Config {
        let mut config: Config = toml::from_str(
            r#"
[endpoints.alpha]
base_url = "http://localhost:1/v1"
model = "m"
concurrency = 2
max_retries = 1
input_price_per_1m = 1.0

[endpoints.beta]
base_url = "http://localhost:2/v1"
model = "m"
concurrency = 1
max_retries = 1

[dispatch]
backoff_unit_ms = 1

[generation]
user_template = "Connect these:\n{chunks}"
tags = ["multihop"]
"#,
        )
        .unwrap();
        config.sampling.hops = hops;
        config.sampling.samples = samples;
        config.sampling.seed = Some(42);
        config.output.include_failed = include_failed;
        config
    }

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("alpha", 2, 1, Duration::from_secs(5)).unwrap(),
            Endpoint::new("beta", 1, 1, Duration::from_secs(5)).unwrap(),
        ]
    }

    fn read_records(path: &Path) -> Vec<GenerationRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_load_chunks_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"a\",\"text\":\"one\"}\n\n{\"id\":\"b\",\"text\":\"two\",\"metadata\":{\"page\":3}}\n",
        )
        .unwrap();

        let chunks = load_chunks(&path).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata["page"], 3);
    }

    #[test]
    fn test_load_chunks_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(&path, "{\"id\":\"a\",\"text\":\"one\"}\nnot json\n").unwrap();

        let err = load_chunks(&path).unwrap_err();
        assert!(matches!(&err, FanoutError::ParseError(msg) if msg.starts_with("Line 2")));
    }

    #[test]
    fn test_single_hop_keeps_order() {
        let mut rng = StdRng::seed_from_u64(0);
        let groups = group_chunks(&corpus(5), 1, Some(3), &mut rng).unwrap();
        let ids: Vec<_> = groups.iter().map(|g| g[0].id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);

        let all = group_chunks(&corpus(2), 1, Some(10), &mut rng).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_multi_hop_clamps_to_available() {
        let mut rng = StdRng::seed_from_u64(0);
        // C(4, 2) = 6
        let groups = group_chunks(&corpus(4), 2, Some(50), &mut rng).unwrap();
        assert_eq!(groups.len(), 6);

        let distinct: HashSet<Vec<String>> = groups
            .iter()
            .map(|g| g.iter().map(|c| c.id.clone()).collect())
            .collect();
        assert_eq!(distinct.len(), 6);
    }

    #[test]
    fn test_multi_hop_rejects_too_few_chunks() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(group_chunks(&corpus(2), 3, None, &mut rng).is_err());
        assert!(group_chunks(&corpus(2), 0, None, &mut rng).is_err());
    }

    #[test]
    fn test_build_call() {
        let template = PromptTemplate {
            system: Some("You write questions.".to_string()),
            user: "Read:\n{chunks}\nAsk one question.".to_string(),
            tags: vec!["qa".to_string()],
        };
        let group = vec![chunk("a", "first"), chunk("b", "second")];

        let call = build_call(&group, &template);

        assert_eq!(call.id, "a+b");
        assert!(call.tags.contains("hops:2"));
        assert!(call.tags.contains("qa"));
        let messages = call.payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(
            messages[1]["content"],
            "Read:\nfirst\n\nsecond\nAsk one question."
        );
    }

    #[test]
    fn test_write_groupings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("groups.jsonl");
        let groups = vec![vec![chunk("a", "x"), chunk("b", "y")]];

        assert_eq!(write_groupings(&groups, &path).unwrap(), 1);

        let line: serde_json::Value =
            serde_json::from_str(std::fs::read_to_string(&path).unwrap().trim()).unwrap();
        assert_eq!(line["chunk_ids"], json!(["a", "b"]));
        assert_eq!(line["chunks"][1]["text"], "y");
    }

    #[tokio::test]
    async fn test_run_writes_successes_in_endpoint_then_input_order() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.jsonl");
        let pipeline = MultiHopPipeline::new(config(1, None, false), endpoints(), Arc::new(ScriptedExecutor))
            .unwrap()
            .with_progress(false);

        let stats = pipeline.run(corpus(4), &output).await.unwrap();

        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.total_units, 8);
        assert_eq!(stats.succeeded, 6);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.written, 6);

        let records = read_records(&output);
        let order: Vec<_> = records
            .iter()
            .map(|r| (r.endpoint.as_str(), r.call_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("alpha", "c1"),
                ("alpha", "c2"),
                ("alpha", "c3"),
                ("beta", "c1"),
                ("beta", "c2"),
                ("beta", "c3"),
            ]
        );
        assert_eq!(records[0].output, "alpha|Connect these:\ntext 1");
        assert_eq!(records[0].tags, vec!["hops:1", "multihop"]);
        assert_eq!(records[0].status, RecordStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_run_includes_failed_and_writes_usage_report() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.jsonl");
        let report = dir.path().join("reports/usage.json");
        let mut config = config(2, Some(3), true);
        config.output.usage_report = Some(report.clone());

        let pipeline = MultiHopPipeline::new(config, endpoints(), Arc::new(ScriptedExecutor))
            .unwrap()
            .with_progress(false);
        let stats = pipeline.run(corpus(3), &output).await.unwrap();

        // C(3, 2) = 3 groupings, two of which contain c0
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 4);
        assert_eq!(stats.written, 6);

        let records = read_records(&output);
        let failed: Vec<_> = records
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 4);
        assert!(failed.iter().all(|r| r.output.is_empty() && r.error.is_some()));
        assert!(records.iter().all(|r| r.chunk_ids.len() == 2));

        let usage: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        let by_endpoint: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(usage["endpoints"].clone()).unwrap();
        assert_eq!(by_endpoint.len(), 2);
        assert_eq!(usage["total"]["succeeded"], 2);
    }

    #[tokio::test]
    async fn test_seeded_runs_pick_same_groupings() {
        let dir = TempDir::new().unwrap();
        let mut picks = Vec::new();

        for name in ["first.jsonl", "second.jsonl"] {
            let output = dir.path().join(name);
            let pipeline = MultiHopPipeline::new(
                config(3, Some(5), true),
                endpoints(),
                Arc::new(ScriptedExecutor),
            )
            .unwrap()
            .with_progress(false);
            pipeline.run(corpus(8), &output).await.unwrap();

            let mut ids: Vec<_> = read_records(&output)
                .into_iter()
                .map(|r| r.call_id)
                .collect();
            ids.sort();
            picks.push(ids);
        }

        assert_eq!(picks[0], picks[1]);
        assert_eq!(picks[0].len(), 10);
    }
}
