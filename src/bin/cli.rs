//! CLI for reading a face from a photo.
//!
//! Usage:
//!   gwansang-cli <image>                        # Human-readable output
//!   gwansang-cli <image> --gender female        # Gender-specific chin reading
//!   gwansang-cli <image> --json                 # JSON output
//!   gwansang-cli <image> -o analysis.json       # Save to file

use anyhow::Context;
use clap::Parser;
use gwansang::{
    analyze_physiognomy, DetectorConfig, FaceDetector, FacialLandmarks, Gender,
    LandmarkExtractor, PhysiognomyResults,
};
use image::GenericImageView;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gwansang-cli")]
#[command(author, version, about = "Face reading (관상) from a photo", long_about = None)]
struct Args {
    /// Input image file
    #[arg(required = true)]
    image: PathBuf,

    /// male or female
    #[arg(short, long)]
    gender: Option<Gender>,

    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Face detector model path
    #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin")]
    detector: PathBuf,

    /// Landmark model path (dlib .dat/.dat.bz2, or bincode)
    #[arg(long, default_value = "shape_predictor_68_face_landmarks.dat.bz2")]
    landmarks: PathBuf,

    /// Minimum face size for detection
    #[arg(long, default_value = "20")]
    min_face_size: u32,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    image: String,
    width: u32,
    height: u32,
    gender: Option<Gender>,
    facial_landmarks: FacialLandmarks,
    analysis_results: PhysiognomyResults,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.verbose {
        eprintln!("Loading models {:?} and {:?}...", args.detector, args.landmarks);
    }
    let detector = FaceDetector::load(&DetectorConfig {
        detector_model: args.detector.clone(),
        landmark_model: args.landmarks.clone(),
        min_face_size: args.min_face_size,
        ..DetectorConfig::default()
    })?;

    if args.verbose {
        eprintln!("Loading image {:?}...", args.image);
    }
    let img = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    let (width, height) = img.dimensions();

    if args.verbose {
        eprintln!("Detecting face...");
    }
    let shape = detector.extract(&img)?;
    let landmarks = FacialLandmarks::from_shape(&shape)?;
    let results = analyze_physiognomy(&landmarks, args.gender);

    let output = Output {
        image: args.image.display().to_string(),
        width,
        height,
        gender: args.gender,
        facial_landmarks: landmarks,
        analysis_results: results,
    };

    let output_str = if args.json {
        serde_json::to_string_pretty(&output)?
    } else {
        format_human_readable(&output)
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &output_str)
            .with_context(|| format!("failed to write {}", path.display()))?;
        if args.verbose {
            eprintln!("Output written to {:?}", path);
        }
    } else {
        println!("{}", output_str);
    }

    Ok(())
}

fn format_human_readable(output: &Output) -> String {
    let r = &output.analysis_results;
    let mut s = String::new();

    s.push_str(&format!("Image: {} ({}x{})\n", output.image, output.width, output.height));
    if let Some(g) = output.gender {
        s.push_str(&format!("Gender: {g}\n"));
    }

    s.push_str("\n--- 종합 ---\n");
    s.push_str(&format!("균형도: {}  조화도: {}\n", r.overall.balance, r.overall.harmony));
    s.push_str(&format!("{}\n", r.overall.summary));

    s.push_str("\n--- 부위별 분석 ---\n");
    for f in &r.features {
        s.push_str(&format!("{} ({}점): {}\n", f.feature, f.score, f.interpretation));
        s.push_str(&format!("  특성: {}\n", f.traits.join(", ")));
    }

    let a = &r.animal_face;
    s.push_str("\n--- 동물상 ---\n");
    s.push_str(&format!("{} {}%\n", a.primary_animal, a.percentage));
    s.push_str(&format!("{}\n", a.description));
    for sec in &a.secondary_animals {
        s.push_str(&format!("  {} {}% ({})\n", sec.animal, sec.percentage, sec.reason));
    }

    let m = &r.detailed_measurements;
    s.push_str("\n--- 측정값 ---\n");
    s.push_str(&format!("  얼굴 비율:   {:.2}\n", m.face_ratio));
    s.push_str(&format!("  눈 사이 거리: {}px\n", m.eye_distance));
    s.push_str(&format!("  코/입 비율:  {:.2}\n", m.nose_to_mouth_ratio));

    s.push_str("\n--- 조언 ---\n");
    for rec in &r.recommendations {
        s.push_str(&format!("  - {rec}\n"));
    }

    s
}
