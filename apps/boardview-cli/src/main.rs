use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

use boardview_core::{LayerPayload, ObjectRange};
use boardview_renderer::compositor::FrameStats;
use boardview_renderer::store::StoreStats;
use boardview_renderer::{HeadlessDevice, TransformSummary, Viewer, ViewerConfig, Viewport};

/// Load board layers into a headless viewer and run one transform session.
#[derive(Parser, Debug)]
#[command(name = "boardview", version)]
struct Args {
    /// Layer payload JSON files, loaded in order.
    #[arg(required = true)]
    layers: Vec<PathBuf>,

    /// Viewer configuration JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON array of object ranges to move.
    #[arg(long)]
    objects: Option<PathBuf>,

    /// JSON array of DRC regions to overlay.
    #[arg(long)]
    drc: Option<PathBuf>,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    dx: f32,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    dy: f32,

    /// Rotation in degrees, counter-clockwise.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    rotate: f32,

    #[arg(long, default_value_t = false)]
    flip: bool,

    /// Rotate and flip about the shared component center.
    #[arg(long, default_value_t = false)]
    component: bool,

    /// Cancel the session instead of committing it.
    #[arg(long, default_value_t = false)]
    cancel: bool,

    /// Undo the committed session afterwards.
    #[arg(long, default_value_t = false)]
    undo: bool,

    /// Canvas size used to pick the zoom for the final frame.
    #[arg(long, default_value_t = 1400.0)]
    canvas: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<TransformSummary>,
    undone: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<FrameStats>,
    store: StoreStats,
    buffer_writes: usize,
    submissions: usize,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn run_session(viewer: &mut Viewer<HeadlessDevice>, args: &Args, objects: &[ObjectRange]) -> Result<Option<TransformSummary>> {
    viewer.highlight_multiple(objects);
    let session = viewer.start_move(objects)?;
    info!("session {} over {} objects", session, objects.len());

    if args.component {
        let center = viewer.setup_component_rotation()?;
        info!("pivot at ({}, {})", center.x, center.y);
    }
    if args.rotate != 0.0 {
        viewer.add_rotation(args.rotate.to_radians())?;
    }
    if args.flip {
        viewer.toggle_flip()?;
    }
    viewer.update_move(args.dx, args.dy)?;
    // one preview frame, as an interactive drag would show it
    viewer.render_frame(1.0);

    if args.cancel {
        viewer.cancel_move()?;
        return Ok(None);
    }
    Ok(Some(viewer.end_move()?))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ViewerConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    let mut viewer = Viewer::new(HeadlessDevice::new(), config);

    for path in &args.layers {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let payload = LayerPayload::from_json(&text).with_context(|| format!("parsing {}", path.display()))?;
        viewer
            .load_layer(payload)
            .with_context(|| format!("decoding {}", path.display()))?;
    }

    if let Some(path) = &args.drc {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let regions = boardview_drc::parse_regions(&text)?;
        viewer.set_drc_regions(boardview_drc::overlay_payload(&regions))?;
        viewer.set_drc_overlay_visible(true);
    }

    let objects: Vec<ObjectRange> = match &args.objects {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    if args.undo && objects.is_empty() {
        bail!("--undo needs --objects");
    }

    let transform = if objects.is_empty() {
        None
    } else {
        run_session(&mut viewer, &args, &objects)?
    };
    let undone = args.undo && viewer.undo()?;

    let mut viewport = Viewport::new(args.canvas, args.canvas);
    if let Some(bounds) = boardview_core::object::union_bounds(&objects) {
        viewport.fit_bbox(&bounds);
    }
    viewer.request_redraw();
    let frame = viewer.render_frame(viewport.zoom as f32);

    let report = Report {
        transform,
        undone,
        frame,
        store: viewer.scene().store().stats(),
        buffer_writes: viewer.device().writes(),
        submissions: viewer.device().submissions(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
