// 该文件是 Jufeng （飓风） 项目的一部分。
// tests/orchestrator_test.rs - 检测编排集成测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use jufeng::{
  catalog::{CategoryToggle, PromptCatalog},
  model::{Region, Segmentation, Segmenter, SegmenterLoader},
  orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, PromptOutcome},
  output::{Annotation, Render, SaveImageFileOutput, draw::Draw},
  raster::{BinaryMask, GeoReference, GeoTransform, ImageRef},
  request::Thresholds,
  vector::{VectorizeError, Vectorizer},
};

const SIZE: u32 = 32;

#[derive(Debug, thiserror::Error)]
#[error("stub failure: {0}")]
struct StubError(String);

/// 按提示词返回预设分数的假模型；分数低于框阈值的区域被过滤
#[derive(Clone, Default)]
struct StubSegmenter {
  scores: HashMap<String, Vec<f32>>,
  rows: HashMap<String, u32>,
  failing: Vec<String>,
  calls: Arc<Mutex<Vec<String>>>,
  cancel_on_first_call: Option<Arc<AtomicBool>>,
}

impl StubSegmenter {
  fn with(mut self, prompt: &str, row: u32, scores: &[f32]) -> Self {
    self.scores.insert(prompt.to_string(), scores.to_vec());
    self.rows.insert(prompt.to_string(), row);
    self
  }

  fn failing(mut self, prompt: &str) -> Self {
    self.failing.push(prompt.to_string());
    self
  }

  fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Segmenter for StubSegmenter {
  type Error = StubError;

  fn predict(
    &self,
    _image: &ImageRef,
    prompt: &str,
    thresholds: Thresholds,
  ) -> Result<Segmentation, StubError> {
    self.calls.lock().unwrap().push(prompt.to_string());
    if let Some(flag) = &self.cancel_on_first_call {
      flag.store(true, Ordering::SeqCst);
    }
    if self.failing.iter().any(|p| p == prompt) {
      return Err(StubError(prompt.to_string()));
    }

    let row = self.rows.get(prompt).copied().unwrap_or(0) as f32;
    let regions: Vec<Region> = self
      .scores
      .get(prompt)
      .map(Vec::as_slice)
      .unwrap_or(&[])
      .iter()
      .filter(|score| **score >= thresholds.box_threshold())
      .enumerate()
      .map(|(i, score)| Region {
        score: *score,
        bbox: [i as f32 * 3.0, row, i as f32 * 3.0 + 2.0, row + 2.0],
      })
      .collect();
    let boxes: Vec<[f32; 4]> = regions.iter().map(|r| r.bbox).collect();
    Ok(Segmentation {
      regions,
      mask: Some(BinaryMask::from_boxes(SIZE, SIZE, &boxes, None)),
    })
  }
}

struct StubLoader {
  segmenter: StubSegmenter,
  fail: bool,
  loads: Arc<AtomicUsize>,
}

impl StubLoader {
  fn new(segmenter: StubSegmenter) -> Self {
    Self {
      segmenter,
      fail: false,
      loads: Arc::new(AtomicUsize::new(0)),
    }
  }
}

impl SegmenterLoader for StubLoader {
  type Segmenter = StubSegmenter;
  type Error = StubError;

  fn load(&self) -> Result<StubSegmenter, StubError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(StubError("weights not found".to_string()));
    }
    Ok(self.segmenter.clone())
  }
}

fn scene(dir: &Path, georef: Option<GeoReference>) -> ImageRef {
  let path = dir.join("scene.png");
  RgbImage::from_pixel(SIZE, SIZE, Rgb([40, 90, 40]))
    .save(&path)
    .unwrap();
  if let Some(georef) = &georef {
    georef.write_sidecar(&path).unwrap();
  }
  ImageRef::new(path, georef)
}

fn orchestrator(
  dir: &TempDir,
  loader: StubLoader,
  config: impl FnOnce(OrchestratorConfig) -> OrchestratorConfig,
) -> Orchestrator<StubLoader, SaveImageFileOutput> {
  let output = SaveImageFileOutput::new(dir.path().join("out/result.png"), Draw::default());
  let config = config(OrchestratorConfig::new(dir.path().join("out")));
  Orchestrator::new(loader, output, config)
}

fn sensitivity(value: f32) -> Thresholds {
  Thresholds::from_sensitivity(value).unwrap()
}

fn hurricane_segmenter() -> StubSegmenter {
  StubSegmenter::default()
    .with("pile of debris", 0, &[0.9, 0.8, 0.7])
    .with("trash pile", 4, &[0.6, 0.5])
    .with("construction debris", 8, &[0.9, 0.9, 0.9, 0.9])
    .with("blue tarp", 12, &[0.4])
}

#[test]
fn synonyms_of_one_category_are_summed() {
  let dir = tempfile::tempdir().unwrap();
  let orchestrator = orchestrator(&dir, StubLoader::new(hurricane_segmenter()), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &[CategoryToggle::DebrisPiles],
      sensitivity(0.24),
    )
    .unwrap();

  assert_eq!(report.count("Debris Piles"), 5);
  assert_eq!(report.total(), 5);
  assert_eq!(report.prompts().len(), 2);
}

#[test]
fn total_equals_sum_of_categories() {
  let dir = tempfile::tempdir().unwrap();
  let orchestrator = orchestrator(&dir, StubLoader::new(hurricane_segmenter()), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &CategoryToggle::default_selection(),
      sensitivity(0.24),
    )
    .unwrap();

  let sum: usize = report.categories().iter().map(|c| c.count).sum();
  assert_eq!(report.total(), sum);
  assert_eq!(report.count("Debris Piles"), 5);
  assert_eq!(report.count("Rubble"), 4);
  assert_eq!(report.count("Blue Tarps"), 1);
  assert_eq!(report.total(), 10);
}

#[test]
fn failing_prompt_counts_as_zero() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter = hurricane_segmenter().failing("rubble");
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &[CategoryToggle::Rubble],
      sensitivity(0.24),
    )
    .unwrap();

  assert_eq!(report.count("Rubble"), 4);
  let failures: Vec<_> = report.failures().collect();
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].prompt, "rubble");
  assert_eq!(failures[0].count, 0);
  assert!(matches!(
    &failures[0].outcome,
    PromptOutcome::Failed { error } if error.contains("rubble")
  ));
}

#[test]
fn every_prompt_failing_still_produces_report() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter = StubSegmenter::default().failing("blue tarp");
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &[CategoryToggle::BlueTarps],
      sensitivity(0.24),
    )
    .unwrap();

  assert_eq!(report.total(), 0);
  assert_eq!(report.count("Blue Tarps"), 0);
  assert!(report.annotated().is_some());
}

#[test]
fn empty_selection_never_calls_model() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter = hurricane_segmenter();
  let calls = Arc::clone(&segmenter.calls);
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| c);

  let none: [&str; 0] = [];
  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &none,
      sensitivity(0.24),
    )
    .unwrap();

  assert_eq!(report.total(), 0);
  assert!(report.categories().is_empty());
  assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn prompts_run_in_catalog_order() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter = hurricane_segmenter();
  let probe = segmenter.clone();
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| c);

  orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &["Blue Tarps", "Debris Piles"],
      sensitivity(0.24),
    )
    .unwrap();

  assert_eq!(
    probe.calls(),
    vec!["pile of debris", "trash pile", "blue tarp"]
  );
}

#[test]
fn repeated_runs_are_reproducible_and_load_once() {
  let dir = tempfile::tempdir().unwrap();
  let loader = StubLoader::new(hurricane_segmenter());
  let loads = Arc::clone(&loader.loads);
  let orchestrator = orchestrator(&dir, loader, |c| c);
  let image = scene(dir.path(), None);
  let catalog = PromptCatalog::default();
  let selection = CategoryToggle::default_selection();

  let first = orchestrator
    .run_selection(&catalog, image.clone(), &selection, sensitivity(0.24))
    .unwrap();
  let second = orchestrator
    .run_selection(&catalog, image, &selection, sensitivity(0.24))
    .unwrap();

  assert_eq!(first.categories(), second.categories());
  assert_eq!(loads.load(Ordering::SeqCst), 1);
  assert!(orchestrator.is_model_loaded());
}

#[test]
fn lower_sensitivity_finds_at_least_as_many() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter =
    StubSegmenter::default().with("blue tarp", 0, &[0.9, 0.5, 0.3, 0.25, 0.22]);
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| c);
  let image = scene(dir.path(), None);
  let catalog = PromptCatalog::default();

  let loose = orchestrator
    .run_selection(&catalog, image.clone(), &[CategoryToggle::BlueTarps], sensitivity(0.20))
    .unwrap();
  let strict = orchestrator
    .run_selection(&catalog, image, &[CategoryToggle::BlueTarps], sensitivity(0.35))
    .unwrap();

  assert_eq!(loose.total(), 5);
  assert_eq!(strict.total(), 2);
  assert!(loose.total() >= strict.total());
}

#[test]
fn model_init_failure_is_fatal() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter = hurricane_segmenter();
  let probe = segmenter.clone();
  let mut loader = StubLoader::new(segmenter);
  loader.fail = true;
  let orchestrator = orchestrator(&dir, loader, |c| c);

  let result = orchestrator.run_selection(
    &PromptCatalog::default(),
    scene(dir.path(), None),
    &CategoryToggle::default_selection(),
    sensitivity(0.24),
  );

  assert!(matches!(result, Err(OrchestratorError::ModelInit(_))));
  assert!(probe.calls().is_empty());
  assert!(!orchestrator.is_model_loaded());
}

#[test]
fn cancellation_returns_partial_report() {
  let dir = tempfile::tempdir().unwrap();
  let cancel = Arc::new(AtomicBool::new(false));
  let mut segmenter = hurricane_segmenter();
  segmenter.cancel_on_first_call = Some(Arc::clone(&cancel));
  let probe = segmenter.clone();
  let orchestrator =
    orchestrator(&dir, StubLoader::new(segmenter), |c| c).with_cancel_flag(cancel);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &CategoryToggle::default_selection(),
      sensitivity(0.24),
    )
    .unwrap();

  assert!(report.is_cancelled());
  assert_eq!(probe.calls().len(), 1);
  assert_eq!(report.count("Debris Piles"), 3);
  assert!(report.annotated().is_some());
}

#[test]
fn annotated_image_is_written_with_overlay() {
  let dir = tempfile::tempdir().unwrap();
  let orchestrator = orchestrator(&dir, StubLoader::new(hurricane_segmenter()), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &[CategoryToggle::DebrisPiles],
      sensitivity(0.24),
    )
    .unwrap();

  let annotated = report.annotated().unwrap();
  assert!(annotated.is_file());
  let rendered = image::open(annotated).unwrap().to_rgb8();
  assert_eq!(rendered.dimensions(), (SIZE, SIZE));
  assert_ne!(rendered.get_pixel(0, 0), &Rgb([40, 90, 40]));
  assert_eq!(rendered.get_pixel(30, 30), &Rgb([40, 90, 40]));
}

#[test]
fn category_and_prompt_masks_are_saved() {
  let dir = tempfile::tempdir().unwrap();
  let orchestrator = orchestrator(&dir, StubLoader::new(hurricane_segmenter()), |c| {
    c.save_prompt_masks(true).retain_category_masks(true)
  });

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &[CategoryToggle::DebrisPiles],
      sensitivity(0.24),
    )
    .unwrap();

  let out = dir.path().join("out");
  assert!(out.join("prompt_pile_of_debris.png").is_file());
  assert!(out.join("prompt_trash_pile.png").is_file());

  assert_eq!(report.category_masks().len(), 1);
  let saved = &report.category_masks()[0];
  assert_eq!(saved.path, out.join("mask_debris_piles.png"));
  let mask = BinaryMask::load(&saved.path).unwrap();
  assert_eq!(mask.foreground_pixels(), 5 * 4);
}

#[test]
fn category_mask_vectorizes_to_georeferenced_polygons() {
  let dir = tempfile::tempdir().unwrap();
  let georef = GeoReference::new(
    "EPSG:32617",
    GeoTransform::north_up(350_000.0, 3_100_000.0, 0.5, 0.5),
  );
  let image = scene(dir.path(), Some(georef.clone()));
  let orchestrator = orchestrator(&dir, StubLoader::new(hurricane_segmenter()), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      image.clone(),
      &[CategoryToggle::DebrisPiles, CategoryToggle::BlueTarps],
      sensitivity(0.24),
    )
    .unwrap();

  let masks = report.category_union_masks();
  let (category, mask) = &masks[0];
  assert_eq!(category, "Debris Piles");
  let mask = mask.clone().with_georef(image.georef.clone());
  let features = Vectorizer::new()
    .with_category(category.as_str())
    .to_vector(&mask)
    .unwrap();

  assert_eq!(features.len(), 5);
  assert_eq!(features.crs.as_deref(), Some("EPSG:32617"));
  let first = &features.features[0];
  assert_eq!(first.id, 1);
  assert_eq!(first.pixel_area, 4);
  assert_eq!(first.exterior.first(), first.exterior.last());
  assert!(first.exterior.contains(&[350_000.0, 3_100_000.0]));

  let path = dir.path().join("out/debris_piles.geojson");
  features.write_geojson(&path).unwrap();
  let value: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
  assert_eq!(value["features"].as_array().unwrap().len(), 5);

  let empty = BinaryMask::new(SIZE, SIZE, Some(georef));
  assert!(matches!(
    Vectorizer::new().to_vector(&empty),
    Err(VectorizeError::NoFeatures)
  ));
}

#[test]
fn reports_are_exported() {
  let dir = tempfile::tempdir().unwrap();
  let segmenter = hurricane_segmenter().failing("trash pile");
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &CategoryToggle::default_selection(),
      sensitivity(0.24),
    )
    .unwrap();

  let csv = report.to_csv();
  assert!(csv.starts_with("category,count,priority\n"));
  assert!(csv.contains("Debris Piles,3,low\n"));
  assert!(csv.ends_with("Total,8,medium\n"));

  let json = report
    .write_json(&dir.path().join("out/report.json"))
    .unwrap();
  let value: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
  assert_eq!(value["total"], 8);
  assert_eq!(value["cancelled"], false);
  assert_eq!(value["prompts"][1]["outcome"]["status"], "failed");
}

/// 总是失败的渲染器
struct BrokenRender;

impl Render<ImageRef, [Annotation]> for BrokenRender {
  type Error = StubError;

  fn render_result(&self, _: &ImageRef, _: &[Annotation]) -> Result<PathBuf, StubError> {
    Err(StubError("disk full".to_string()))
  }
}

#[test]
fn render_failure_keeps_counts() {
  let dir = tempfile::tempdir().unwrap();
  let orchestrator = Orchestrator::new(
    StubLoader::new(hurricane_segmenter()),
    BrokenRender,
    OrchestratorConfig::new(dir.path().join("out")),
  );

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      scene(dir.path(), None),
      &CategoryToggle::default_selection(),
      sensitivity(0.24),
    )
    .unwrap();

  assert!(report.annotated().is_none());
  assert_eq!(report.count("Debris Piles"), 5);
  assert_eq!(report.total(), 10);
  assert_eq!(report.failures().count(), 0);
}

#[test]
fn missing_base_image_leaves_no_annotation() {
  let dir = tempfile::tempdir().unwrap();
  let orchestrator = orchestrator(&dir, StubLoader::new(hurricane_segmenter()), |c| c);

  let report = orchestrator
    .run_selection(
      &PromptCatalog::default(),
      ImageRef::new(dir.path().join("gone.png"), None),
      &[CategoryToggle::DebrisPiles],
      sensitivity(0.24),
    )
    .unwrap();

  assert!(report.annotated().is_none());
  assert_eq!(report.count("Debris Piles"), 5);
}

#[test]
fn non_ascii_categories_get_distinct_files() {
  let dir = tempfile::tempdir().unwrap();
  let catalog = PromptCatalog::from_json_str(
    r#"[{"name": "碎片堆", "prompts": ["废墟"]}, {"name": "蓝色防水布", "prompts": ["蓝布"]}]"#,
  )
  .unwrap();
  let segmenter = StubSegmenter::default()
    .with("废墟", 0, &[0.9])
    .with("蓝布", 10, &[0.9]);
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| {
    c.save_prompt_masks(true).retain_category_masks(true)
  });

  let report = orchestrator
    .run_selection(
      &catalog,
      scene(dir.path(), None),
      &["碎片堆", "蓝色防水布"],
      sensitivity(0.24),
    )
    .unwrap();

  let masks = report.category_masks();
  assert_eq!(masks.len(), 2);
  assert_ne!(masks[0].path, masks[1].path);

  let out = dir.path().join("out");
  assert_eq!(masks[0].path, out.join("mask_碎片堆.png"));
  assert!(out.join("prompt_废墟.png").is_file());
  assert!(out.join("prompt_蓝布.png").is_file());

  let debris = BinaryMask::load(&masks[0].path).unwrap();
  assert!(debris.get(0, 0));
  assert!(!debris.get(0, 10));
  let tarps = BinaryMask::load(&masks[1].path).unwrap();
  assert!(!tarps.get(0, 0));
  assert!(tarps.get(0, 10));
}

#[test]
fn colliding_category_names_are_disambiguated() {
  let dir = tempfile::tempdir().unwrap();
  let catalog = PromptCatalog::empty()
    .register("Blue Tarps", ["blue tarp"])
    .register("Blue-Tarps", ["tarp roof"]);
  let segmenter = StubSegmenter::default()
    .with("blue tarp", 0, &[0.9])
    .with("tarp roof", 10, &[0.9]);
  let orchestrator = orchestrator(&dir, StubLoader::new(segmenter), |c| {
    c.retain_category_masks(true)
  });

  let report = orchestrator
    .run_selection(
      &catalog,
      scene(dir.path(), None),
      &["Blue Tarps", "Blue-Tarps"],
      sensitivity(0.24),
    )
    .unwrap();

  let out = dir.path().join("out");
  let paths: Vec<_> = report.category_masks().iter().map(|m| m.path.clone()).collect();
  assert_eq!(
    paths,
    vec![out.join("mask_blue_tarps.png"), out.join("mask_blue_tarps_2.png")]
  );
  assert!(BinaryMask::load(&paths[1]).unwrap().get(0, 10));
  assert!(!BinaryMask::load(&paths[1]).unwrap().get(0, 0));
}
