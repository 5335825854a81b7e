//! Whole-pipeline runs against in-process fakes.

mod common;

use common::{config_builder, Fakes};
use paper_digest::store::{self, SessionLayout};
use paper_digest::{
    DigestError, DigestRequest, PaperSource, Pipeline, PipelineProgressCallback, Stage,
};
use std::sync::{Arc, Mutex};

fn query(topics: &[&str]) -> DigestRequest {
    DigestRequest {
        query: Some("transformers".into()),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn full_run_writes_the_session_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).build().unwrap();
    let results_dir = config.results_dir.clone();
    let pipeline = Pipeline::with_stages(config, fakes.stages(true));

    let bundle = pipeline.run(&query(&["language", "vision"])).await.unwrap();

    assert!(store::is_valid_session_id(&bundle.session_id));
    let counts = bundle.counts();
    assert_eq!(counts.papers, 2);
    assert_eq!(counts.summaries, 2);
    assert_eq!(counts.syntheses, 2);
    assert_eq!(counts.audio_files, 4);

    let ids: Vec<&str> = bundle.papers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1706_03762", "1512_03385"]);
    assert_eq!(bundle.classification_of("1706_03762").unwrap().primary_topic, "language");
    assert_eq!(bundle.classification_of("1512_03385").unwrap().primary_topic, "vision");

    let topics: Vec<&str> = bundle.syntheses.iter().map(|s| s.topic.as_str()).collect();
    assert_eq!(topics, vec!["language", "vision"]);
    assert_eq!(bundle.syntheses[0].paper_ids, vec!["1706_03762"]);

    // Two summaries and two syntheses at 100 in / 20 out each.
    assert_eq!(bundle.stats.total_input_tokens, 400);
    assert_eq!(bundle.stats.total_output_tokens, 80);
    assert_eq!(
        bundle.stats.stage_durations_ms.keys().copied().collect::<Vec<_>>(),
        Stage::ALL.to_vec()
    );

    let layout = SessionLayout::new(&results_dir, &bundle.session_id);
    assert!(layout.results_json().is_file());
    assert!(layout.summary_file("1706_03762").is_file());
    assert!(layout.synthesis_file("language").is_file());
    assert!(layout.synthesis_file("vision").is_file());
    assert!(layout.audio_dir().join("summary_1512_03385.mp3").is_file());
    assert!(layout.audio_dir().join("synthesis_vision.mp3").is_file());

    let summary_md = std::fs::read_to_string(layout.summary_file("1706_03762")).unwrap();
    assert!(summary_md.starts_with("# Attention Is All You Need\n"));
    assert!(summary_md.contains("**Primary topic:** language"));
    assert!(summary_md.contains("Ashish Vaswani & Noam Shazeer (2017). Attention Is All You Need."));

    let reloaded = store::load_bundle(&results_dir, &bundle.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.session_id, bundle.session_id);
    assert_eq!(reloaded.counts(), counts);
    assert_eq!(reloaded.papers[0].full_text, None);
}

#[tokio::test]
async fn narration_is_cleaned_markdown() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).build().unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(true));

    let bundle = pipeline.run(&query(&["language", "vision"])).await.unwrap();

    let texts = fakes.speech.texts.lock().unwrap();
    assert_eq!(texts.len(), 4);
    assert!(texts.iter().all(|t| !t.contains("**")));
    assert!(texts[2].starts_with("language. Common themes."));
    assert!(texts[2].contains("for example attention"));

    let audio = &bundle.audio_files[0];
    assert_eq!(audio.bytes, texts[0].chars().count() as u64);
    assert!((audio.estimated_duration_secs - audio.bytes as f64 * 8.0 / 32_000.0).abs() < 1e-9);
}

#[tokio::test]
async fn no_topics_means_one_general_synthesis_without_embeddings() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).build().unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(false));

    let bundle = pipeline.run(&query(&[])).await.unwrap();

    assert!(bundle
        .classifications
        .iter()
        .all(|c| c.primary_topic == "General"));
    assert_eq!(bundle.syntheses.len(), 1);
    assert_eq!(bundle.syntheses[0].topic, "General");
    assert_eq!(bundle.syntheses[0].paper_ids.len(), 2);
}

#[tokio::test]
async fn topics_with_the_same_slug_keep_separate_files() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).build().unwrap();
    let results_dir = config.results_dir.clone();
    let pipeline = Pipeline::with_stages(config, fakes.stages(true));

    // Neither label has an ASCII letter, so both reduce to the `topic` slug.
    let bundle = pipeline.run(&query(&["语言", "视觉"])).await.unwrap();

    let slugs: Vec<(&str, &str)> = bundle
        .syntheses
        .iter()
        .map(|s| (s.topic.as_str(), s.slug.as_str()))
        .collect();
    assert_eq!(slugs, vec![("语言", "topic"), ("视觉", "topic_2")]);

    let layout = SessionLayout::new(&results_dir, &bundle.session_id);
    let first = std::fs::read_to_string(layout.synthesis_file("topic")).unwrap();
    let second = std::fs::read_to_string(layout.synthesis_file("topic_2")).unwrap();
    assert!(first.starts_with("# 语言\n"));
    assert!(second.starts_with("# 视觉\n"));

    let audio: Vec<&str> = bundle
        .audio_files
        .iter()
        .map(|a| a.file_name.as_str())
        .filter(|n| n.starts_with("synthesis_"))
        .collect();
    assert_eq!(audio, vec!["synthesis_topic.mp3", "synthesis_topic_2.mp3"]);
    assert!(layout.audio_dir().join("synthesis_topic_2.mp3").is_file());

    let reloaded = store::load_bundle(&results_dir, &bundle.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.syntheses[1].slug, "topic_2");
}

#[tokio::test]
async fn classification_picks_one_of_the_given_topics() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).generate_audio(false).build().unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(true));

    let bundle = pipeline.run(&query(&["biology", "vision"])).await.unwrap();

    for c in &bundle.classifications {
        assert!(c.primary_topic == "biology" || c.primary_topic == "vision");
        assert_eq!(c.scores.len(), 2);
    }
}

#[tokio::test]
async fn topics_without_an_embedder_fail_before_writing() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).build().unwrap();
    let results_dir = config.results_dir.clone();
    let pipeline = Pipeline::with_stages(config, fakes.stages(false));

    let err = pipeline
        .run_session("0badc0de", &query(&["language"]))
        .await
        .unwrap_err();

    assert!(matches!(err, DigestError::ProviderNotConfigured { .. }));
    assert!(fakes.generator.requests.lock().unwrap().is_empty());
    assert!(store::load_bundle(&results_dir, "0badc0de").await.unwrap().is_none());
}

#[tokio::test]
async fn audio_can_be_disabled() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).generate_audio(false).build().unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(true));

    let bundle = pipeline.run(&query(&["language"])).await.unwrap();

    assert!(bundle.audio_files.is_empty());
    assert!(fakes.speech.texts.lock().unwrap().is_empty());
    assert!(!bundle.stats.stage_durations_ms.contains_key(&Stage::Audio));
}

#[tokio::test]
async fn full_text_is_fetched_from_the_pdf_link() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path())
        .fetch_full_text(true)
        .generate_audio(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(false));

    pipeline.run(&query(&[])).await.unwrap();

    assert_eq!(
        *fakes.processor.calls.lock().unwrap(),
        vec![
            "https://arxiv.org/pdf/1706.03762v7",
            "https://arxiv.org/pdf/1512.03385v1"
        ]
    );
    let requests = fakes.generator.requests.lock().unwrap();
    assert!(requests[0].prompt.contains("A paper about language and vision."));
}

#[tokio::test]
async fn uploads_and_dois_are_digested_alongside_the_query() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let config = config_builder(tmp.path()).generate_audio(false).build().unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(false));

    let upload = tmp.path().join("uploads/abcd1234/my_paper.pdf");
    let request = DigestRequest {
        query: Some("transformers".into()),
        pdf_paths: vec![upload.clone()],
        dois: vec!["https://doi.org/10.1038/nature14539".into()],
        ..Default::default()
    };
    let bundle = pipeline.run(&request).await.unwrap();

    let sources: Vec<PaperSource> = bundle.papers.iter().map(|p| p.source).collect();
    assert_eq!(
        sources,
        vec![PaperSource::Upload, PaperSource::Doi, PaperSource::Arxiv, PaperSource::Arxiv]
    );
    assert_eq!(bundle.papers[0].title, "Extracted Title");
    assert_eq!(bundle.papers[1].doi.as_deref(), Some("10.1038/nature14539"));
    assert_eq!(
        *fakes.processor.calls.lock().unwrap(),
        vec![upload.display().to_string()]
    );
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl PipelineProgressCallback for Recorder {
    fn on_run_start(&self, session_id: &str) {
        self.events.lock().unwrap().push(format!("run:{session_id}"));
    }
    fn on_stage_start(&self, stage: Stage, items: usize) {
        self.events.lock().unwrap().push(format!("start:{stage}:{items}"));
    }
    fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
        self.events.lock().unwrap().push(format!("done:{stage}"));
    }
    fn on_run_complete(&self, _session_id: &str) {
        self.events.lock().unwrap().push("complete".into());
    }
}

#[tokio::test]
async fn progress_events_arrive_in_stage_order() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let recorder = Arc::new(Recorder::default());
    let config = config_builder(tmp.path())
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let pipeline = Pipeline::with_stages(config, fakes.stages(true));

    pipeline
        .run_session("abcdef01", &query(&["language", "vision"]))
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap();
    let expected: Vec<String> = std::iter::once("run:abcdef01".to_string())
        .chain(Stage::ALL.iter().flat_map(|s| {
            let items = match s {
                Stage::Research => 0,
                Stage::Audio => 4,
                _ => 2,
            };
            [format!("start:{s}:{items}"), format!("done:{s}")]
        }))
        .chain(std::iter::once("complete".to_string()))
        .collect();
    assert_eq!(*events, expected);
}
