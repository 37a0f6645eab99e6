//! FFmpeg-backed demux/decode shell.
//!
//! Thin wrappers over `ffmpeg-next`: packets come out as raw payloads with
//! timebase ticks, video decodes to packed RGBA8, audio decodes to
//! interleaved S16 stereo. All timestamp math happens here so the rest of
//! the engine only ever sees seconds.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};

use crate::core::time::NO_PTS;
use crate::media::source::{
    AudioDecoder, AudioFrame, AudioStreamInfo, DemuxEvent, Demuxer, MediaPacket, SourceError,
    SourceParts, StreamKind, StreamsInfo, VideoDecoder, VideoFrame, VideoStreamInfo,
};

fn rational_to_f64(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

/// Open a container and split it into the per-thread collaborator handles.
pub fn open(path: &Path) -> Result<SourceParts, SourceError> {
    ffmpeg::init().map_err(|e| SourceError::Open(e.to_string()))?;

    let ictx = ffmpeg::format::input(&path).map_err(|e| SourceError::Open(e.to_string()))?;

    let mut info = StreamsInfo {
        duration_sec: ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE),
        ..Default::default()
    };

    let mut audio_decoder: Option<Box<dyn AudioDecoder>> = None;
    let mut video_decoder: Option<Box<dyn VideoDecoder>> = None;
    let mut audio_index = None;
    let mut video_index = None;

    if let Some(stream) = ictx.streams().best(ffmpeg::media::Type::Video) {
        let dec = FfmpegVideoDecoder::from_stream(&stream)?;
        info.video = Some(VideoStreamInfo {
            width: dec.width,
            height: dec.height,
            fps: dec.fps,
            codec: dec.codec_name.clone(),
        });
        video_index = Some(stream.index());
        video_decoder = Some(Box::new(dec));
    }

    if let Some(stream) = ictx.streams().best(ffmpeg::media::Type::Audio) {
        match FfmpegAudioDecoder::from_stream(&stream) {
            Ok(dec) => {
                info.audio = Some(AudioStreamInfo {
                    sample_rate: dec.nominal_rate,
                    channels: 2,
                    codec: dec.codec_name.clone(),
                });
                audio_index = Some(stream.index());
                audio_decoder = Some(Box::new(dec));
            }
            Err(e) => {
                // An undecodable audio track degrades to silent playback.
                warn!("audio stream unusable, continuing without audio: {e}");
            }
        }
    }

    if audio_decoder.is_none() && video_decoder.is_none() {
        return Err(SourceError::NoStreams);
    }

    info!(
        "opened {:?}: video={} audio={} duration={:.2}s",
        path,
        video_index.is_some(),
        audio_index.is_some(),
        info.duration_sec
    );

    Ok(SourceParts {
        info,
        demuxer: Box::new(FfmpegDemuxer {
            ictx,
            audio_index,
            video_index,
        }),
        audio_decoder,
        video_decoder,
    })
}

struct FfmpegDemuxer {
    ictx: ffmpeg::format::context::Input,
    audio_index: Option<usize>,
    video_index: Option<usize>,
}

impl Demuxer for FfmpegDemuxer {
    fn read(&mut self) -> Result<DemuxEvent, SourceError> {
        loop {
            match self.ictx.packets().next() {
                Some((stream, packet)) => {
                    let kind = if Some(stream.index()) == self.audio_index {
                        StreamKind::Audio
                    } else if Some(stream.index()) == self.video_index {
                        StreamKind::Video
                    } else {
                        continue;
                    };
                    let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
                    return Ok(DemuxEvent::Packet(MediaPacket {
                        stream: kind,
                        data,
                        pts_ticks: packet.pts(),
                        dts_ticks: packet.dts(),
                        keyframe: packet.is_key(),
                    }));
                }
                None => return Ok(DemuxEvent::Eof),
            }
        }
    }

    fn seek(&mut self, target_sec: f64, backward: bool) -> Result<(), SourceError> {
        let ts = (target_sec * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        let result = if backward {
            self.ictx.seek(ts, ..ts)
        } else {
            self.ictx.seek(ts, ts..)
        };
        result.map_err(|e| SourceError::Seek(e.to_string()))
    }
}

fn rebuild_packet(packet: &MediaPacket) -> ffmpeg::Packet {
    let mut pkt = ffmpeg::Packet::copy(&packet.data);
    pkt.set_pts(packet.pts_ticks);
    pkt.set_dts(packet.dts_ticks);
    pkt
}

struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    time_base: f64,
    width: u32,
    height: u32,
    fps: f64,
    frame_duration: f64,
    codec_name: String,
}

impl FfmpegVideoDecoder {
    fn from_stream(stream: &ffmpeg::Stream) -> Result<Self, SourceError> {
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| SourceError::UnsupportedCodec(e.to_string()))?;
        let decoder = ctx
            .decoder()
            .video()
            .map_err(|e| SourceError::UnsupportedCodec(e.to_string()))?;

        let fps = {
            let rate = rational_to_f64(stream.avg_frame_rate());
            if rate > 0.0 {
                rate
            } else {
                25.0
            }
        };

        Ok(Self {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_duration: 1.0 / fps,
            time_base: rational_to_f64(stream.time_base()),
            codec_name: format!("{:?}", stream.parameters().id()),
            scaler: None,
            decoder,
        })
    }

    fn pts_of(&self, frame: &ffmpeg::frame::Video) -> f64 {
        match frame.timestamp().or_else(|| frame.pts()) {
            Some(ticks) => ticks as f64 * self.time_base,
            None => NO_PTS,
        }
    }

    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> Result<VideoFrame, SourceError> {
        if self.scaler.is_none() {
            self.scaler = Some(
                ffmpeg::software::scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    ffmpeg::format::Pixel::RGBA,
                    self.width,
                    self.height,
                    ffmpeg::software::scaling::Flags::BILINEAR,
                )
                .map_err(|e| SourceError::Decode(e.to_string()))?,
            );
        }

        let mut rgba = ffmpeg::frame::Video::empty();
        self.scaler
            .as_mut()
            .unwrap()
            .run(frame, &mut rgba)
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        // Repack line by line: the scaler output carries per-line padding.
        let stride = rgba.stride(0);
        let row_bytes = self.width as usize * 4;
        let mut data = Vec::with_capacity(row_bytes * self.height as usize);
        let plane = rgba.data(0);
        for row in 0..self.height as usize {
            let start = row * stride;
            data.extend_from_slice(&plane[start..start + row_bytes]);
        }

        Ok(VideoFrame {
            data,
            width: self.width,
            height: self.height,
            pts: self.pts_of(frame),
            duration: self.frame_duration,
        })
    }

    fn receive_all(&mut self) -> Result<Vec<VideoFrame>, SourceError> {
        let mut out = Vec::new();
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            out.push(self.convert(&decoded)?);
        }
        Ok(out)
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>, SourceError> {
        let pkt = rebuild_packet(packet);
        self.decoder
            .send_packet(&pkt)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        self.receive_all()
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>, SourceError> {
        if self.decoder.send_eof().is_err() {
            return Ok(Vec::new());
        }
        self.receive_all()
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<ffmpeg::software::resampling::Context>,
    time_base: f64,
    nominal_rate: u32,
    resample_ratio: f64,
    built_out_rate: u32,
    codec_name: String,
}

impl FfmpegAudioDecoder {
    fn from_stream(stream: &ffmpeg::Stream) -> Result<Self, SourceError> {
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| SourceError::UnsupportedCodec(e.to_string()))?;
        let decoder = ctx
            .decoder()
            .audio()
            .map_err(|e| SourceError::UnsupportedCodec(e.to_string()))?;

        let nominal_rate = decoder.rate();
        Ok(Self {
            time_base: rational_to_f64(stream.time_base()),
            nominal_rate,
            resample_ratio: 1.0,
            built_out_rate: 0,
            codec_name: format!("{:?}", stream.parameters().id()),
            resampler: None,
            decoder,
        })
    }

    fn target_out_rate(&self) -> u32 {
        (self.nominal_rate as f64 * self.resample_ratio).round().max(1.0) as u32
    }

    fn ensure_resampler(&mut self) -> Result<(), SourceError> {
        let out_rate = self.target_out_rate();
        if self.resampler.is_some() && self.built_out_rate == out_rate {
            return Ok(());
        }
        let in_layout = if self.decoder.channel_layout().is_empty() {
            ffmpeg::ChannelLayout::default(self.decoder.channels() as i32)
        } else {
            self.decoder.channel_layout()
        };
        debug!(
            "building audio resampler: {} Hz -> {} Hz (ratio {:.4})",
            self.decoder.rate(),
            out_rate,
            self.resample_ratio
        );
        self.resampler = Some(
            ffmpeg::software::resampling::Context::get(
                self.decoder.format(),
                in_layout,
                self.decoder.rate(),
                ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
                ffmpeg::ChannelLayout::STEREO,
                out_rate,
            )
            .map_err(|e| SourceError::Decode(e.to_string()))?,
        );
        self.built_out_rate = out_rate;
        Ok(())
    }

    fn convert(&mut self, frame: &ffmpeg::frame::Audio) -> Result<AudioFrame, SourceError> {
        self.ensure_resampler()?;

        let pts = match frame.timestamp().or_else(|| frame.pts()) {
            Some(ticks) => ticks as f64 * self.time_base,
            None => NO_PTS,
        };
        let duration = frame.samples() as f64 / self.decoder.rate().max(1) as f64;

        let mut resampled = ffmpeg::frame::Audio::empty();
        self.resampler
            .as_mut()
            .unwrap()
            .run(frame, &mut resampled)
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        // Packed S16 stereo: 4 bytes per sample frame.
        let bytes = resampled.samples() * 4;
        let pcm = resampled.data(0)[..bytes].to_vec();

        Ok(AudioFrame {
            pcm,
            pts,
            duration,
            sample_rate: self.nominal_rate,
            channels: 2,
        })
    }

    fn receive_all(&mut self) -> Result<Vec<AudioFrame>, SourceError> {
        let mut out = Vec::new();
        let mut decoded = ffmpeg::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            out.push(self.convert(&decoded)?);
        }
        Ok(out)
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<AudioFrame>, SourceError> {
        let pkt = rebuild_packet(packet);
        self.decoder
            .send_packet(&pkt)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        self.receive_all()
    }

    fn drain(&mut self) -> Result<Vec<AudioFrame>, SourceError> {
        if self.decoder.send_eof().is_err() {
            return Ok(Vec::new());
        }
        self.receive_all()
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn set_resample_ratio(&mut self, ratio: f64) {
        // Rebuilding the resampler is not free; ignore sub-0.1% changes.
        if (ratio - self.resample_ratio).abs() > 0.001 {
            self.resample_ratio = ratio;
        }
    }

    fn output_rate(&self) -> u32 {
        self.nominal_rate
    }

    fn output_channels(&self) -> u16 {
        2
    }
}
