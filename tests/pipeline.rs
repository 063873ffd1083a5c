//! Integration tests for the full assembly pipeline.
//!
//! External programs are replaced by [`FakeTools`], a scripted
//! [`ToolRunner`] that writes small tagged products, records every
//! invocation, can fail a chosen step, and delays early pages so that
//! concurrent runs complete out of order.

use async_trait::async_trait;
use djvu_tailor::{
    assemble, assemble_sync, AssemblyConfig, AssemblyConfigBuilder, AssemblyProgressCallback,
    InputStructureError, PageEncoding, Stage, StepFailure, TailorError, Tool, ToneDetection,
    ToolInvocation, ToolRunner,
};
use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Call {
    tool: Tool,
    page: Option<usize>,
    args: Vec<String>,
}

#[derive(Default)]
struct FakeTools {
    calls: Mutex<Vec<Call>>,
    fail: Vec<(usize, Tool)>,
    /// Page count used to make later pages finish first.
    stagger: usize,
}

impl FakeTools {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(fail: Vec<(usize, Tool)>) -> Arc<Self> {
        Arc::new(Self {
            fail,
            ..Default::default()
        })
    }

    fn staggered(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            stagger: pages,
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn tools_for(&self, page: usize) -> Vec<Tool> {
        self.calls()
            .into_iter()
            .filter(|c| c.page == Some(page))
            .map(|c| c.tool)
            .collect()
    }
}

/// `page-0007/…` → 7.
fn page_of(path: &Path) -> Option<usize> {
    path.parent()?
        .file_name()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, inv: &ToolInvocation, _timeout: Option<Duration>) -> Result<(), StepFailure> {
        let page = page_of(&inv.output);
        let args: Vec<String> = inv.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        self.calls.lock().unwrap().push(Call {
            tool: inv.tool,
            page,
            args: args.clone(),
        });

        if let Some(p) = page {
            if self.stagger > 0 {
                let delay = 3 * (self.stagger + 1).saturating_sub(p) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail.contains(&(p, inv.tool)) {
                return Err(StepFailure::ExitStatus {
                    program: inv.program.clone(),
                    code: Some(1),
                    stderr: format!("{} choked on page {p}", inv.tool),
                });
            }
        }

        let product = match inv.tool {
            // djvm -c <out> <page>...: concatenate the pages.
            Tool::Djvm => {
                let mut doc = Vec::new();
                for page in &args[2..] {
                    doc.extend(std::fs::read(page).unwrap());
                }
                doc
            }
            tool => format!("[{}:{}]", page.unwrap_or(0), tool).into_bytes(),
        };
        std::fs::write(&inv.output, product).unwrap();
        Ok(())
    }
}

fn touch(root: &Path, rel: &str) {
    let p = root.join(rel);
    std::fs::create_dir_all(p.parent().unwrap()).unwrap();
    std::fs::write(p, b"II*\0").unwrap();
}

fn config(tools: &Arc<FakeTools>) -> AssemblyConfigBuilder {
    AssemblyConfig::builder()
        .tone_detection(ToneDetection::AlwaysBitonal)
        .runner(tools.clone() as Arc<dyn ToolRunner>)
}

/// `1.tif`, `background/2.tif` + `foreground/2.tif`, `3.tif`.
fn three_page_book() -> TempDir {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "1.tif");
    touch(dir.path(), "background/2.tif");
    touch(dir.path(), "foreground/2.tif");
    touch(dir.path(), "3.tif");
    dir
}

/// Minimal little-endian 8x8 bilevel TIFF, as written by scanners:
/// `compression` 1 is uncompressed, 4 is CCITT Group 4.
fn bilevel_tiff(compression: u16) -> Vec<u8> {
    let pixels: &[u8] = match compression {
        4 => &[0x00, 0x10, 0x01],
        _ => &[0xFF; 8],
    };
    let entries: [(u16, u16, u32); 9] = [
        (256, 3, 8), // ImageWidth
        (257, 3, 8), // ImageLength
        (258, 3, 1), // BitsPerSample
        (259, 3, compression as u32), // Compression
        (262, 3, 0), // PhotometricInterpretation: WhiteIsZero
        (273, 4, 8 + 2 + 9 * 12 + 4), // StripOffsets
        (277, 3, 1), // SamplesPerPixel
        (278, 3, 8), // RowsPerStrip
        (279, 4, pixels.len() as u32), // StripByteCounts
    ];
    let mut tiff = b"II*\0".to_vec();
    tiff.extend(8u32.to_le_bytes());
    tiff.extend((entries.len() as u16).to_le_bytes());
    for (tag, kind, value) in entries {
        tiff.extend(tag.to_le_bytes());
        tiff.extend(kind.to_le_bytes());
        tiff.extend(1u32.to_le_bytes());
        tiff.extend(value.to_le_bytes());
    }
    tiff.extend(0u32.to_le_bytes());
    tiff.extend(pixels);
    tiff
}

fn workspace_in(dir: &TempDir) -> PathBuf {
    dir.path().join("work")
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

// ── Assembly ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_page_book_is_assembled_in_order() {
    let input = three_page_book();
    let out = input.path().join("book.djvu");
    let tools = FakeTools::new();

    let report = assemble(input.path(), Some(&out), &config(&tools).build().unwrap())
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        "[1:cjb2][2:csepdjvu][3:cjb2]"
    );
    assert_eq!(report.output, out);
    assert_eq!(report.stats.total_pages, 3);
    assert_eq!(report.stats.single_pages, 2);
    assert_eq!(report.stats.dual_pages, 1);
    let encodings: Vec<_> = report.pages.iter().map(|p| p.encoding).collect();
    assert_eq!(
        encodings,
        vec![PageEncoding::Bitonal, PageEncoding::Compound, PageEncoding::Bitonal]
    );
    assert_eq!(report.retained_workspace, None);

    assert_eq!(
        tools.tools_for(2),
        vec![Tool::TiffToPnm, Tool::PbmToRle, Tool::TiffToPnm, Tool::CsepDjvu]
    );
    assert_eq!(tools.tools_for(1), vec![Tool::Cjb2]);
}

#[tokio::test]
async fn default_output_lands_in_input_directory() {
    let input = three_page_book();
    let tools = FakeTools::new();
    let report = assemble(input.path(), None, &config(&tools).build().unwrap())
        .await
        .unwrap();
    assert_eq!(report.output, input.path().join("output.djvu"));
    assert!(report.output.is_file());
}

#[tokio::test]
async fn encoder_flags_follow_config() {
    let input = three_page_book();
    let tools = FakeTools::new();
    let cfg = config(&tools)
        .dpi(600)
        .bitonal_loss_level(100)
        .photo_quality("60,80".parse().unwrap())
        .build()
        .unwrap();
    assemble(input.path(), None, &cfg).await.unwrap();

    let calls = tools.calls();
    let cjb2 = calls.iter().find(|c| c.tool == Tool::Cjb2).unwrap();
    assert_eq!(&cjb2.args[..4], ["-dpi", "600", "-losslevel", "100"]);
    assert!(cjb2.args[4].ends_with("1.tif"));
    assert!(cjb2.args[5].ends_with("page.partial.djvu"));

    let csep = calls.iter().find(|c| c.tool == Tool::CsepDjvu).unwrap();
    assert_eq!(&csep.args[..4], ["-d", "600", "-q", "60,80"]);
    assert!(csep.args[4].ends_with("separated.sep"));
}

#[tokio::test]
async fn grayscale_single_page_takes_the_photo_chain() {
    let input = TempDir::new().unwrap();
    GrayImage::from_pixel(16, 16, Luma([128]))
        .save(input.path().join("plate.tif"))
        .unwrap();
    let tools = FakeTools::new();
    let cfg = AssemblyConfig::builder()
        .runner(tools.clone() as Arc<dyn ToolRunner>)
        .build()
        .unwrap();

    let report = assemble(input.path(), None, &cfg).await.unwrap();
    assert_eq!(report.pages[0].encoding, PageEncoding::Photo);
    assert_eq!(tools.tools_for(1), vec![Tool::TiffToPnm, Tool::C44]);

    let c44 = tools.calls().into_iter().find(|c| c.tool == Tool::C44).unwrap();
    assert_eq!(&c44.args[..4], ["-dpi", "300", "-slice", "74,89,99"]);
    assert!(c44.args[4].ends_with("page.pnm"));
}

#[tokio::test]
async fn bilevel_scans_take_the_bitonal_chain() {
    let input = TempDir::new().unwrap();
    std::fs::write(input.path().join("1.tif"), bilevel_tiff(1)).unwrap();
    std::fs::write(input.path().join("2.tif"), bilevel_tiff(4)).unwrap();
    let tools = FakeTools::new();
    let cfg = AssemblyConfig::builder()
        .runner(tools.clone() as Arc<dyn ToolRunner>)
        .build()
        .unwrap();
    assert_eq!(cfg.tone_detection, ToneDetection::ColorMode);

    let report = assemble(input.path(), None, &cfg).await.unwrap();
    for page in 1..=2 {
        assert_eq!(report.pages[page - 1].encoding, PageEncoding::Bitonal);
        assert_eq!(tools.tools_for(page), vec![Tool::Cjb2]);
    }
}

#[tokio::test]
async fn merge_order_is_page_order_for_any_worker_count() {
    for workers in [1, 4] {
        let input = TempDir::new().unwrap();
        for i in 1..=8 {
            touch(input.path(), &format!("scan{i}.tif"));
        }
        let tools = FakeTools::staggered(8);
        let cfg = config(&tools).workers(workers).build().unwrap();
        let report = assemble(input.path(), None, &cfg).await.unwrap();

        let expected: String = (1..=8).map(|i| format!("[{i}:cjb2]")).collect();
        assert_eq!(std::fs::read_to_string(&report.output).unwrap(), expected, "workers={workers}");
        let ids: Vec<_> = report.pages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["scan1", "scan2", "scan3", "scan4", "scan5", "scan6", "scan7", "scan8"]);
    }
}

#[tokio::test]
async fn keep_temp_retains_intermediates() {
    let input = three_page_book();
    let work = workspace_in(&input);
    let tools = FakeTools::new();
    let cfg = config(&tools).temp_dir(&work).keep_temp(true).build().unwrap();

    let report = assemble(input.path(), None, &cfg).await.unwrap();
    let root = report.retained_workspace.unwrap();
    assert_eq!(root.parent(), Some(work.as_path()));
    assert_eq!(entries(&work), vec![root.clone()]);

    let page2 = root.join("page-0002");
    assert_eq!(
        std::fs::read_to_string(page2.join("separated.sep")).unwrap(),
        "[2:pbmtodjvurle][2:tifftopnm]"
    );
    assert!(page2.join("page.djvu").is_file());
    assert!(!page2.join("page.partial.djvu").exists());
    assert!(root.join("page-0003").join("page.djvu").is_file());
}

#[tokio::test]
async fn workspace_is_removed_after_success() {
    let input = three_page_book();
    let work = workspace_in(&input);
    let tools = FakeTools::new();
    let cfg = config(&tools).temp_dir(&work).build().unwrap();
    assemble(input.path(), None, &cfg).await.unwrap();
    assert!(work.is_dir());
    assert!(entries(&work).is_empty());
}

#[tokio::test]
async fn shared_workspace_base_keeps_foreign_files() {
    let input = three_page_book();
    let work = workspace_in(&input);
    std::fs::create_dir_all(&work).unwrap();
    std::fs::write(work.join("other-job.lock"), b"busy").unwrap();
    let tools = FakeTools::new();
    let cfg = config(&tools).temp_dir(&work).build().unwrap();

    assemble(input.path(), None, &cfg).await.unwrap();
    assert!(input.path().join("output.djvu").is_file());
    assert_eq!(entries(&work), vec![work.join("other-job.lock")]);
    assert_eq!(std::fs::read(work.join("other-job.lock")).unwrap(), b"busy");
}

#[tokio::test]
async fn workspace_base_that_is_a_file_conflicts() {
    let input = three_page_book();
    let work = workspace_in(&input);
    std::fs::write(&work, b"not a directory").unwrap();
    let tools = FakeTools::new();
    let cfg = config(&tools).temp_dir(&work).build().unwrap();

    let err = assemble(input.path(), None, &cfg).await.unwrap_err();
    assert!(matches!(err, TailorError::WorkspaceConflict { .. }), "{err:?}");
    assert!(tools.calls().is_empty());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn page_failure_writes_no_output_and_cleans_up() {
    let input = three_page_book();
    let out = input.path().join("book.djvu");
    let work = workspace_in(&input);
    let tools = FakeTools::failing(vec![(2, Tool::PbmToRle)]);
    let cfg = config(&tools).workers(3).temp_dir(&work).build().unwrap();

    let err = assemble(input.path(), Some(&out), &cfg).await.unwrap_err();
    match err {
        TailorError::PagesFailed { ref failures, total } => {
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].page, 2);
            assert_eq!(failures[0].stage, Stage::EncodeMask);
        }
        ref other => panic!("unexpected {other:?}"),
    }
    assert!(err.failure_summary().contains("[encode-mask]"));

    assert!(!out.exists());
    assert!(entries(&work).is_empty());
    // Siblings still ran; the merge never did.
    assert_eq!(tools.tools_for(3), vec![Tool::Cjb2]);
    assert!(tools.calls().iter().all(|c| c.tool != Tool::Djvm));
}

#[tokio::test]
async fn every_failed_page_is_reported() {
    let input = three_page_book();
    let tools = FakeTools::failing(vec![(1, Tool::Cjb2), (3, Tool::Cjb2)]);
    let cfg = config(&tools).workers(2).build().unwrap();

    match assemble(input.path(), None, &cfg).await.unwrap_err() {
        TailorError::PagesFailed { failures, .. } => {
            let pages: Vec<_> = failures.iter().map(|f| f.page).collect();
            assert_eq!(pages, vec![1, 3]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!input.path().join("output.djvu").exists());
}

#[tokio::test]
async fn merge_failure_is_assembly_error() {
    let input = three_page_book();
    let tools = Arc::new(FailingDjvm(FakeTools::default()));
    let cfg = AssemblyConfig::builder()
        .tone_detection(ToneDetection::AlwaysBitonal)
        .runner(tools as Arc<dyn ToolRunner>)
        .build()
        .unwrap();

    let err = assemble(input.path(), None, &cfg).await.unwrap_err();
    assert!(matches!(err, TailorError::Assembly { .. }), "{err:?}");
    assert!(!input.path().join("output.djvu").exists());
    assert!(!input.path().join("output.djvu.partial").exists());
}

struct FailingDjvm(FakeTools);

#[async_trait]
impl ToolRunner for FailingDjvm {
    async fn run(&self, inv: &ToolInvocation, timeout: Option<Duration>) -> Result<(), StepFailure> {
        if inv.tool == Tool::Djvm {
            return Err(StepFailure::ExitStatus {
                program: "djvm".into(),
                code: Some(1),
                stderr: "corrupt page".into(),
            });
        }
        self.0.run(inv, timeout).await
    }
}

/// Deletes the run workspace behind the pipeline's back, so that tearing it
/// down afterwards fails.
struct VanishingWorkspace(Arc<FakeTools>);

#[async_trait]
impl ToolRunner for VanishingWorkspace {
    async fn run(&self, inv: &ToolInvocation, timeout: Option<Duration>) -> Result<(), StepFailure> {
        let result = self.0.run(inv, timeout).await;
        let page_file = match inv.tool {
            Tool::Djvm => inv.args.last().map(PathBuf::from),
            _ if result.is_err() => Some(inv.output.clone()),
            _ => None,
        };
        if let Some(root) = page_file.as_deref().and_then(Path::parent).and_then(Path::parent) {
            std::fs::remove_dir_all(root).unwrap();
        }
        result
    }
}

#[tokio::test]
async fn cleanup_failure_does_not_hide_page_failures() {
    let input = three_page_book();
    let tools = FakeTools::failing(vec![(3, Tool::Cjb2)]);
    let cfg = AssemblyConfig::builder()
        .tone_detection(ToneDetection::AlwaysBitonal)
        .temp_dir(workspace_in(&input))
        .runner(Arc::new(VanishingWorkspace(tools.clone())) as Arc<dyn ToolRunner>)
        .build()
        .unwrap();

    match assemble(input.path(), None, &cfg).await.unwrap_err() {
        TailorError::PagesFailed { failures, total } => {
            assert_eq!(total, 3);
            assert_eq!(failures[0].page, 3);
        }
        other => panic!("cleanup error replaced the page failure: {other:?}"),
    }
    assert!(!input.path().join("output.djvu").exists());
}

#[tokio::test]
async fn cleanup_failure_after_merge_still_succeeds() {
    let input = three_page_book();
    let tools = FakeTools::new();
    let cfg = AssemblyConfig::builder()
        .tone_detection(ToneDetection::AlwaysBitonal)
        .temp_dir(workspace_in(&input))
        .runner(Arc::new(VanishingWorkspace(tools.clone())) as Arc<dyn ToolRunner>)
        .build()
        .unwrap();

    let report = assemble(input.path(), None, &cfg).await.unwrap();
    assert_eq!(report.stats.total_pages, 3);
    assert_eq!(report.retained_workspace, None);
    assert!(input.path().join("output.djvu").is_file());
}

#[tokio::test]
async fn orphaned_layer_fails_before_any_work() {
    let input = TempDir::new().unwrap();
    touch(input.path(), "1.tif");
    touch(input.path(), "foreground/2.tif");
    let work = workspace_in(&input);
    let tools = FakeTools::new();
    let cfg = config(&tools).temp_dir(&work).build().unwrap();

    let err = assemble(input.path(), None, &cfg).await.unwrap_err();
    assert!(matches!(
        err,
        TailorError::InputStructure(InputStructureError::OrphanedLayer { .. })
    ));
    assert!(tools.calls().is_empty());
    assert!(!work.exists());
    assert!(!input.path().join("output.djvu").exists());
}

#[tokio::test]
async fn existing_output_needs_overwrite() {
    let input = three_page_book();
    let out = input.path().join("book.djvu");
    std::fs::write(&out, b"old").unwrap();
    let tools = FakeTools::new();

    let err = assemble(input.path(), Some(&out), &config(&tools).build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, TailorError::OutputExists { .. }));
    assert!(tools.calls().is_empty());

    let cfg = config(&tools).overwrite(true).build().unwrap();
    assemble(input.path(), Some(&out), &cfg).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        "[1:cjb2][2:csepdjvu][3:cjb2]"
    );
}

// ── Progress & sync API ──────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    run: Mutex<Option<(usize, usize)>>,
}

impl AssemblyProgressCallback for Counting {
    fn on_page_start(&self, _page: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page: usize, _total: usize, bytes: u64) {
        assert!(bytes > 0);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_run_complete(&self, total: usize, success: usize) {
        *self.run.lock().unwrap() = Some((total, success));
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let input = three_page_book();
    let tools = FakeTools::new();
    let counter = Arc::new(Counting::default());
    let cfg = config(&tools)
        .workers(2)
        .progress_callback(counter.clone())
        .build()
        .unwrap();

    assemble(input.path(), None, &cfg).await.unwrap();
    assert_eq!(counter.started.load(Ordering::SeqCst), 3);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 3);
    assert_eq!(*counter.run.lock().unwrap(), Some((3, 3)));
}

#[test]
fn sync_wrapper_runs_outside_a_runtime() {
    let input = three_page_book();
    let tools = FakeTools::new();
    let report = assemble_sync(input.path(), None, &config(&tools).build().unwrap()).unwrap();
    assert_eq!(report.stats.total_pages, 3);
    assert!(report.stats.output_bytes > 0);
}

#[test]
fn report_serialises_to_json() {
    let input = three_page_book();
    let tools = FakeTools::new();
    let report = assemble_sync(input.path(), None, &config(&tools).build().unwrap()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["pages"][1]["encoding"], "compound");
    assert_eq!(json["stats"]["dual_pages"], 1);
}
