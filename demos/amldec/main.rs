// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! amldec, a simple program feeding a stream to the Amlogic hardware decoder. Prints statistics
//! about the decoded pictures and what the process information registry learned about the
//! stream.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use log::warn;

#[cfg(feature = "amlogic")]
use aml_codecs::backend::amlogic::AmlogicBackend;
#[cfg(feature = "amlogic")]
use aml_codecs::backend::amlogic::AmlogicVideoOutput;
use aml_codecs::backend::dummy::DummyBackend;
use aml_codecs::backend::dummy::DummyOutput;
use aml_codecs::backend::DecoderBackend;
use aml_codecs::backend::VideoOutput;
use aml_codecs::bitstream_utils::AccessUnitIterator;
use aml_codecs::bitstream_utils::IvfFileHeader;
use aml_codecs::bitstream_utils::IvfIterator;
use aml_codecs::capabilities::HardwareCapabilities;
use aml_codecs::capabilities::StaticCapabilities;
use aml_codecs::config::DecoderConfig;
use aml_codecs::config::PlayerSettings;
use aml_codecs::decoder::controller::AmlCodec;
use aml_codecs::decoder::controller::PlaybackRate;
use aml_codecs::decoder::controller::RateOutcome;
use aml_codecs::decoder::device_pts_to_seconds;
use aml_codecs::decoder::poll::PollDevice;
use aml_codecs::decoder::Error;
use aml_codecs::decoder::PictureStatus;
use aml_codecs::decoder::StreamHints;
use aml_codecs::process_info;
#[cfg(feature = "amlogic")]
use aml_codecs::process_info::platform::AmlPlatform;
use aml_codecs::process_info::ProcessInfo;

use crate::util::Args;
use crate::util::BackendKind;

mod util;

#[derive(Debug, Default)]
struct Stats {
    pictures: u64,
    interlaced: u64,
    first_pts: Option<u64>,
    last_pts: u64,
    device_errors: u64,
}

impl Stats {
    fn record(&mut self, pts: u64, interlaced: bool) {
        self.pictures += 1;
        if interlaced {
            self.interlaced += 1;
        }
        self.first_pts.get_or_insert(pts);
        self.last_pts = pts;
    }
}

/// Takes every ready picture out of the decoder. Returns whether the end of the stream was
/// reached.
fn take_pictures(codec: &mut AmlCodec, stats: &mut Stats, verbose: bool) -> anyhow::Result<bool> {
    loop {
        match codec.get_picture() {
            Ok(PictureStatus::Frame(frame)) => {
                if verbose {
                    println!(
                        "picture {:>5} slot {} pts {:.3}s{}",
                        stats.pictures,
                        frame.index,
                        frame.pts_seconds(),
                        if frame.interlaced { " interlaced" } else { "" }
                    );
                }
                stats.record(frame.pts, frame.interlaced);
                codec.release_frame(frame.index, false)?;
            }
            Ok(PictureStatus::Eos) => return Ok(true),
            Ok(PictureStatus::TryAgain) | Ok(PictureStatus::NeedData) => return Ok(false),
            Err(Error::Device(e)) => {
                warn!("decoder error, continuing after reset: {}", e);
                stats.device_errors += 1;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_process_info(info: &ProcessInfo) {
    let (width, height) = info.video_dimensions();
    println!("decoder:      {}", info.video_decoder_name());
    println!("dimensions:   {}x{}", width, height);
    println!("fps:          {:.3}", info.video_fps());
    println!("aspect:       {:.3}", info.video_dar());
    println!("bit depth:    {}", info.video_bit_depth());
    println!("hdr:          {}", info.video_hdr_type().name());
    println!("deinterlace:  {}", info.video_deint_method());
    println!("queue level:  {}%", info.video_queue_level());
    println!("data level:   {}%", info.video_queue_data_level());
    println!("speed/tempo:  {}/{}", info.speed(), info.tempo());
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let input = fs::read(&args.input)
        .with_context(|| format!("error reading {}", args.input.display()))?;

    let ivf = IvfFileHeader::parse(&input);
    let codec = match (args.input_format, ivf.as_ref().and_then(IvfFileHeader::encoded_format)) {
        (Some(codec), _) | (None, Some(codec)) => codec,
        (None, None) => bail!("cannot deduce the input format, use --input-format"),
    };
    let (width, height) = match &ivf {
        Some(header) => (header.width as u32, header.height as u32),
        None => (args.width, args.height),
    };
    let units: Vec<&[u8]> = match ivf {
        Some(_) => IvfIterator::new(&input).map(|(packet, _)| packet).collect(),
        None => AccessUnitIterator::new(&input, codec).collect(),
    };

    let hints = StreamHints {
        codec,
        width,
        height,
        fps_rate: args.fps_rate,
        fps_scale: args.fps_scale,
        ..Default::default()
    };

    let (backend, output, caps): (
        Box<dyn DecoderBackend>,
        Box<dyn VideoOutput>,
        Arc<dyn HardwareCapabilities>,
    ) = match args.backend {
        BackendKind::Dummy => (
            Box::new(DummyBackend::default()),
            Box::new(DummyOutput::new()),
            Arc::new(StaticCapabilities::full_4k()),
        ),
        #[cfg(feature = "amlogic")]
        BackendKind::Amlogic => (
            Box::new(AmlogicBackend::new()),
            Box::new(AmlogicVideoOutput::new()),
            {
                AmlPlatform::register();
                Arc::new(StaticCapabilities::probe())
            },
        ),
        #[cfg(not(feature = "amlogic"))]
        BackendKind::Amlogic => bail!("built without the amlogic backend"),
    };

    let info = process_info::create_instance(PlayerSettings::default());
    let mut codec = AmlCodec::new(
        hints,
        backend,
        output,
        caps,
        info.clone(),
        DecoderConfig::default(),
    )
    .with_poll_device(PollDevice::global());
    codec.open_decoder()?;

    if let Some(tempo) = args.tempo {
        if let RateOutcome::Clamped { requested, applied } =
            codec.set_speed(PlaybackRate::Tempo(tempo))?
        {
            println!("tempo {} not allowed, playing at {}", requested, applied);
        }
    }

    let frame_duration = if args.fps_rate > 0 {
        Duration::from_secs_f64(args.fps_scale as f64 / args.fps_rate as f64)
    } else {
        Duration::ZERO
    };
    let mut stats = Stats::default();

    for (n, unit) in units.iter().enumerate() {
        let pts = frame_duration * n as u32;
        loop {
            match codec.add_data(unit, Some(pts), Some(pts)) {
                Ok(_) => break,
                Err(Error::BufferFull) => {
                    take_pictures(&mut codec, &mut stats, args.verbose)?;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(Error::Device(e)) => {
                    warn!("dropping access unit {}: {}", n, e);
                    stats.device_errors += 1;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        take_pictures(&mut codec, &mut stats, args.verbose)?;
    }

    codec.set_drain(true)?;
    while !take_pictures(&mut codec, &mut stats, args.verbose)? {
        if codec.poll_frame(Duration::from_millis(10)).is_err() {
            thread::sleep(Duration::from_millis(1));
        }
    }
    let outcome = codec.close_decoder();

    println!(
        "{} access units, {} pictures ({} interlaced), {} device errors, {:?}",
        units.len(),
        stats.pictures,
        stats.interlaced,
        stats.device_errors,
        outcome
    );
    if let Some(first_pts) = stats.first_pts {
        println!(
            "pts range:    {:.3}s - {:.3}s",
            device_pts_to_seconds(first_pts),
            device_pts_to_seconds(stats.last_pts)
        );
    }
    print_process_info(&info);

    Ok(())
}
