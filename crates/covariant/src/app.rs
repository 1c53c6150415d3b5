//! Shared application-level helpers for the CLI example.
//!
//! These functions wire up I/O (load image, JSON/PNG output, logging) around
//! [`find_features_image`] so every front end shares the same behavior.

use crate::multiscale::{find_features_image, AdaptationStats, FeatureParams};
use anyhow::{Context, Result};
use covariant_core::{BoundaryMode, Keypoint};
use image::{GrayImage, ImageReader, Luma};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::Path, path::PathBuf};

/// A detection run read from JSON. Every `Option` overrides the matching
/// default of [`FeatureParams`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DetectionConfig {
    pub image: PathBuf,
    pub output_json: Option<PathBuf>,
    pub output_png: Option<PathBuf>,
    pub boundary: Option<BoundaryMode>,

    pub num_octaves: Option<usize>,
    pub num_scales_per_octave: Option<usize>,
    pub scale_initial: Option<f64>,
    pub scale_geometric_factor: Option<f64>,
    pub first_octave_index: Option<i32>,
    pub image_padding_size: Option<usize>,
    pub scale_camera: Option<f64>,

    pub kappa: Option<f32>,
    pub cornerness_threshold: Option<f32>,
    pub differentiation_sigma: Option<f32>,
    pub integration_sigma: Option<f32>,
    pub nms_radius: Option<u32>,
    pub scale_neighborhood: Option<bool>,

    pub max_iterations: Option<usize>,
    pub convergence_tolerance: Option<f64>,
    pub divergence_bound: Option<f64>,
    pub patch_radius_factor: Option<f64>,

    pub merge_radius: Option<f32>,
    pub log_level: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeypointDump {
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub num_octaves: usize,
    pub num_scales_per_octave: usize,
    pub merge_radius: f32,
    pub stats: AdaptationStats,
    pub keypoints: Vec<Keypoint>,
}

/// Load the image, detect, write the JSON dump and the optional overlay.
pub fn run_detection(cfg: DetectionConfig) -> Result<()> {
    if let Some(level) = cfg.log_level.as_deref() {
        // A logger installed by the host application takes precedence.
        if let Err(err) = crate::logger::init_with_level(level) {
            log::debug!("{err:#}");
        }
    }

    let params = feature_params(&cfg)?;
    let img = ImageReader::open(&cfg.image)
        .with_context(|| format!("opening image {}", cfg.image.display()))?
        .decode()
        .with_context(|| format!("decoding image {}", cfg.image.display()))?
        .to_luma8();

    let res = find_features_image(&img, &params).context("detecting features")?;
    log::info!(
        "{}: {} keypoints from {} candidates",
        cfg.image.display(),
        res.keypoints.len(),
        res.stats.candidates
    );

    let json_out = cfg
        .output_json
        .clone()
        .unwrap_or_else(|| cfg.image.with_extension("features.json"));
    let dump = KeypointDump {
        image: cfg.image.to_string_lossy().into_owned(),
        width: img.width(),
        height: img.height(),
        num_octaves: covariant_core::pyramid::num_octaves_for(
            img.width() as usize,
            img.height() as usize,
            &params.pyramid,
        ),
        num_scales_per_octave: params.pyramid.num_scales_per_octave,
        merge_radius: params.merge_radius,
        stats: res.stats,
        keypoints: res.keypoints,
    };
    write_json(&json_out, &dump)?;

    if let Some(png_out) = &cfg.output_png {
        let mut vis = img.clone();
        draw_keypoints(&mut vis, &dump.keypoints);
        vis.save(png_out)
            .with_context(|| format!("writing {}", png_out.display()))?;
    }

    Ok(())
}

/// Defaults with the overrides of `cfg` applied.
pub fn feature_params(cfg: &DetectionConfig) -> Result<FeatureParams> {
    let mut params = FeatureParams::default();
    apply_params_overrides(&mut params, cfg);

    if params.merge_radius < 0.0 {
        anyhow::bail!("merge radius must be >= 0");
    }
    params.harris.validate()?;
    params.pyramid.validate()?;
    params.adapt.validate()?;
    Ok(params)
}

fn apply_params_overrides(params: &mut FeatureParams, cfg: &DetectionConfig) {
    if let Some(b) = cfg.boundary {
        params.boundary = b;
    }

    let py = &mut params.pyramid;
    if let Some(n) = cfg.num_octaves {
        py.num_octaves = Some(n);
    }
    if let Some(n) = cfg.num_scales_per_octave {
        py.num_scales_per_octave = n;
    }
    if let Some(s) = cfg.scale_initial {
        py.scale_initial = s;
    }
    if let Some(k) = cfg.scale_geometric_factor {
        py.scale_geometric_factor = k;
    }
    if let Some(o) = cfg.first_octave_index {
        py.first_octave_index = o;
    }
    if let Some(p) = cfg.image_padding_size {
        py.image_padding_size = p;
    }
    if let Some(s) = cfg.scale_camera {
        py.scale_camera = s;
    }

    let h = &mut params.harris;
    if let Some(k) = cfg.kappa {
        h.kappa = k;
    }
    if let Some(t) = cfg.cornerness_threshold {
        h.cornerness_threshold = t;
    }
    if let Some(s) = cfg.differentiation_sigma {
        h.differentiation_sigma = s;
    }
    if let Some(s) = cfg.integration_sigma {
        h.integration_sigma = s;
    }
    if let Some(n) = cfg.nms_radius {
        h.nms_radius = n;
    }
    if let Some(b) = cfg.scale_neighborhood {
        h.scale_neighborhood = b;
    }

    let a = &mut params.adapt;
    if let Some(n) = cfg.max_iterations {
        a.max_iterations = n;
    }
    if let Some(t) = cfg.convergence_tolerance {
        a.convergence_tolerance = t;
    }
    if let Some(b) = cfg.divergence_bound {
        a.divergence_bound = b;
    }
    if let Some(f) = cfg.patch_radius_factor {
        a.patch_radius_factor = f;
    }

    if let Some(r) = cfg.merge_radius {
        params.merge_radius = r;
    }
}

/// Mark each center and trace its shape ellipse.
fn draw_keypoints(vis: &mut GrayImage, keypoints: &[Keypoint]) {
    let mut put = |x: f32, y: f32| {
        let xi = x.round() as i64;
        let yi = y.round() as i64;
        if xi >= 0 && yi >= 0 && xi < vis.width() as i64 && yi < vis.height() as i64 {
            vis.put_pixel(xi as u32, yi as u32, Luma([255u8]));
        }
    };

    for k in keypoints {
        let [cx, cy] = k.center;
        for dy in -1..=1 {
            for dx in -1..=1 {
                put(cx + dx as f32, cy + dy as f32);
            }
        }

        let [[a, b], [_, d]] = k.shape_matrix;
        let [major, minor] = k.radii();
        if !(major.is_finite() && minor.is_finite()) {
            continue;
        }
        // the largest eigenvalue of the shape matrix lies along the minor axis
        let theta = 0.5 * (2.0 * b).atan2(a - d) + std::f32::consts::FRAC_PI_2;
        let (s, c) = theta.sin_cos();
        let steps = ((major * 8.0).ceil() as usize).clamp(16, 720);
        for i in 0..steps {
            let t = i as f32 / steps as f32 * std::f32::consts::TAU;
            let (u, v) = (major * t.cos(), minor * t.sin());
            put(cx + u * c - v * s, cy + u * s + v * c);
        }
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut json_file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(&mut json_file, value)?;
    json_file.write_all(b"\n")?;
    Ok(())
}

pub fn load_config(path: &Path) -> Result<DetectionConfig> {
    let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
    let cfg: DetectionConfig = serde_json::from_reader(file)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}
