use std::{net::SocketAddr, process, sync::Arc};

use anyhow::{bail, Context};
use mudra::{
    classifier::OnnxClassifier,
    config::{Config, Mode},
    dataset::DatasetWriter,
    detector::Detector,
    hand::{HandDetector, HandLandmarkNetwork, PalmDetector},
    image::Frame,
    pipeline::{GestureResult, Pipeline},
    resolution::Resolution,
    server::Server,
    timer::FpsCounter,
    video::{
        self,
        httpcam::HttpStream,
        webcam::{Webcam, WebcamOptions},
        StillImages,
    },
};

const USAGE: &str = "usage:
    mudra serve                      serve the recognition HTTP API
    mudra live [<addr:port>]         recognize gestures from a webcam or MJPEG stream
    mudra recognize <image>...       recognize gestures in image files
    mudra capture <label> [<count>]  record webcam frames into the dataset";

const DEFAULT_CAPTURE_COUNT: u64 = 1000;

fn main() -> anyhow::Result<()> {
    mudra::init_logger!();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some((command, args)) = args.split_first() else {
        eprintln!("{USAGE}");
        process::exit(1);
    };

    let config = Config::load()?;
    log::debug!("{:?}", config);

    match (command.as_str(), args) {
        ("serve", []) => serve(&config),
        ("live", []) => live(&config, None),
        ("live", [addr]) => live(&config, Some(addr.parse().context("invalid stream address")?)),
        ("recognize", paths) if !paths.is_empty() => recognize(&config, paths),
        ("capture", [label]) => capture(&config, label, DEFAULT_CAPTURE_COUNT),
        ("capture", [label, count]) => {
            capture(&config, label, count.parse().context("invalid frame count")?)
        }
        _ => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
    }
}

fn load_pipeline(config: &Config, mode: Mode) -> anyhow::Result<Pipeline> {
    let (vocabulary, table) = config.vocabulary()?;
    let detector = load_detector(config, mode)?;
    let classifier = OnnxClassifier::load(&config.model, vocabulary.len())?;
    log::info!(
        "loaded models, gestures: {}",
        vocabulary.labels().collect::<Vec<_>>().join(", ")
    );
    Pipeline::new(
        Arc::new(detector),
        Arc::new(classifier),
        vocabulary,
        table,
        config.threshold(mode),
    )
}

fn load_detector(config: &Config, mode: Mode) -> anyhow::Result<HandDetector> {
    let min_confidence = config.min_hand_confidence(mode);
    let palms = PalmDetector::load(&config.palm_model, min_confidence)?;
    let landmarks = HandLandmarkNetwork::load(&config.hand_model, min_confidence)?;
    Ok(HandDetector::new(palms, landmarks).with_max_hands(config.max_hands))
}

fn serve(config: &Config) -> anyhow::Result<()> {
    let pipeline = load_pipeline(config, Mode::Request)?;
    Server::bind(&config.addr, pipeline, config.workers)?.run()
}

fn live(config: &Config, stream: Option<SocketAddr>) -> anyhow::Result<()> {
    let pipeline = load_pipeline(config, Mode::Stream)?;
    let show = |_: &Frame, result: &GestureResult| {
        if let GestureResult::Recognized {
            label,
            confidence,
            text,
        } = result
        {
            log::info!("{} ({}) {:.2}", text, label, confidence);
        }
    };

    match stream {
        Some(addr) => video::run_stream(HttpStream::connect(addr, "/video")?, &pipeline, show),
        None => video::run_stream(open_webcam(config)?, &pipeline, show),
    }
}

fn recognize(config: &Config, paths: &[String]) -> anyhow::Result<()> {
    let pipeline = load_pipeline(config, Mode::Request)?;
    let mut source = StillImages::new(paths);
    let mut paths = paths.iter();
    video::run_stream(&mut source, &pipeline, |_, result| {
        let path = paths.next().map_or("?", |p| p.as_str());
        match result {
            GestureResult::Recognized {
                label,
                confidence,
                text,
            } => println!("{path}: {label} {text} ({confidence:.3})"),
            GestureResult::Rejected { reason } => println!("{path}: {reason}"),
        }
    })
}

fn capture(config: &Config, label: &str, count: u64) -> anyhow::Result<()> {
    if count == 0 {
        bail!("frame count must be at least 1");
    }
    let detector = load_detector(config, Mode::Stream)?;
    let mut writer = DatasetWriter::open(&config.dataset_dir, label)?;
    let mut webcam = open_webcam(config)?;

    log::info!(
        "capturing {} frames of '{}' into {}",
        count,
        label,
        writer.dir().display()
    );
    let mut fps = FpsCounter::new("capture");
    let mut saved = 0;
    while saved < count {
        let frame = webcam.read()?;
        let hands = detector.detect(&frame)?;
        if let Some(hand) = hands.first() {
            let index = writer.write(&frame, Some(hand))?;
            log::debug!("saved sample #{}", index);
            saved += 1;
        }
        fps.tick_with(webcam.timers().cloned().chain(detector.timers()));
    }
    log::info!("captured {} frames", saved);
    Ok(())
}

fn open_webcam(config: &Config) -> anyhow::Result<Webcam> {
    let mut options = WebcamOptions::default().resolution(Resolution::RES_480P);
    if let Some(name) = &config.webcam_name {
        options = options.name(name.clone());
    }
    Webcam::open(options)
}
