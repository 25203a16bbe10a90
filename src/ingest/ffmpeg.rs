//! FFmpeg-backed stream decoding.
//!
//! Used for HLS playlists, RTSP and video files. The input context, decoder and
//! scaler live in one handle that is dropped as soon as capture has its frame.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::capture::{FrameStream, StreamOpener};
use super::decode::{first_frame, PacketDecoder};
use crate::frame::Frame;

pub(crate) struct FfmpegOpener;

impl StreamOpener for FfmpegOpener {
    fn open(&self, url: &str) -> Result<Box<dyn FrameStream>> {
        Ok(Box::new(FfmpegStream::open(url)?))
    }
}

struct FfmpegStream {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl FfmpegStream {
    fn open(url: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&url)
            .with_context(|| format!("failed to open '{}' with ffmpeg", url))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("stream has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "opened {} ({}x{}) with ffmpeg",
            url,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
        })
    }
}

impl FrameStream for FfmpegStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let stream_index = self.stream_index;
        let packets = self
            .input
            .packets()
            .filter(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet);
        let mut decoder = VideoDecoder(&mut self.decoder);
        let Some(decoded) = first_frame(&mut decoder, packets) else {
            return Ok(None);
        };

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::from_rgb(pixels, width, height).map(Some)
    }
}

struct VideoDecoder<'a>(&'a mut ffmpeg::codec::decoder::Video);

impl PacketDecoder for VideoDecoder<'_> {
    type Packet = ffmpeg::Packet;
    type Frame = ffmpeg::frame::Video;

    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.0
            .send_packet(packet)
            .context("send packet to ffmpeg decoder")
    }

    fn receive_frame(&mut self) -> Option<ffmpeg::frame::Video> {
        let mut decoded = ffmpeg::frame::Video::empty();
        self.0.receive_frame(&mut decoded).ok().map(|_| decoded)
    }

    fn send_eof(&mut self) -> Result<()> {
        self.0.send_eof().context("flush ffmpeg decoder")
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
