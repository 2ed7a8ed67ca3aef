//! FFmpeg capture command construction
//!
//! Builds `ffmpeg` argument vectors for pulling a live stream into one of the
//! supported containers, optionally split into fixed-length segments.

use super::traits::{CaptureRequest, CommandBuilder};
use crate::recorder::state::RecordFormat;

/// User agent sent with every media request
pub const FFMPEG_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 11; SAMSUNG SM-G973U) AppleWebKit/537.36 \
     (KHTML, like Gecko) SamsungBrowser/14.2 Chrome/87.0.4280.141 Mobile Safari/537.36";

const PROTOCOL_WHITELIST: &str = "rtmp,crypto,file,http,https,tcp,tls,udp,rtp,httpproxy";

/// Network tuning values
#[derive(Debug, Clone, Copy)]
struct Tuning {
    rw_timeout: &'static str,
    analyzeduration: &'static str,
    probesize: &'static str,
    bufsize: &'static str,
    max_muxing_queue_size: &'static str,
}

const DEFAULT_TUNING: Tuning = Tuning {
    rw_timeout: "15000000",
    analyzeduration: "20000000",
    probesize: "10000000",
    bufsize: "8000k",
    max_muxing_queue_size: "1024",
};

const OVERSEAS_TUNING: Tuning = Tuning {
    rw_timeout: "50000000",
    analyzeduration: "40000000",
    probesize: "20000000",
    bufsize: "15000k",
    max_muxing_queue_size: "2048",
};

/// Builds ffmpeg commands; the program name can be overridden for bundled binaries
#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    program: String,
}

impl FfmpegCommandBuilder {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Input side: connection tuning, headers, proxy
    fn input_args(&self, request: &CaptureRequest) -> Vec<String> {
        let tuning = if request.overseas {
            OVERSEAS_TUNING
        } else {
            DEFAULT_TUNING
        };

        let mut args: Vec<String> = Vec::with_capacity(48);
        args.push(self.program.clone());
        if let Some(proxy) = request.proxy.as_deref().filter(|p| !p.is_empty()) {
            args.extend(["-http_proxy".to_string(), proxy.to_string()]);
        }
        args.extend(strings(&["-y", "-v", "verbose", "-rw_timeout", tuning.rw_timeout]));
        args.extend(strings(&["-loglevel", "error", "-hide_banner"]));
        if let Some(headers) = request.headers.as_deref().filter(|h| !h.is_empty()) {
            args.extend(["-headers".to_string(), headers.to_string()]);
        }
        args.extend(strings(&[
            "-user_agent",
            FFMPEG_USER_AGENT,
            "-protocol_whitelist",
            PROTOCOL_WHITELIST,
            "-thread_queue_size",
            "1024",
            "-analyzeduration",
            tuning.analyzeduration,
            "-probesize",
            tuning.probesize,
            "-fflags",
            "+discardcorrupt",
            "-re",
            "-i",
        ]));
        args.push(request.media_url.clone());
        args.extend(strings(&[
            "-bufsize",
            tuning.bufsize,
            "-sn",
            "-dn",
            "-reconnect_delay_max",
            "60",
            "-reconnect_streamed",
            "-reconnect_at_eof",
            "-max_muxing_queue_size",
            tuning.max_muxing_queue_size,
            "-correct_ts_overflow",
            "1",
            "-avoid_negative_ts",
            "1",
        ]));
        args
    }

    /// Output side: codecs and muxer for the requested container
    fn output_args(request: &CaptureRequest) -> Vec<String> {
        let segment = if request.is_segmented() {
            request.segment_time.map(|secs| secs.to_string())
        } else {
            None
        };

        match (request.format, segment.as_deref()) {
            (RecordFormat::Ts, Some(secs)) => strings(&[
                "-c:v", "copy", "-c:a", "copy", "-map", "0", "-f", "segment",
                "-segment_time", secs, "-segment_format", "mpegts", "-reset_timestamps", "1",
            ]),
            (RecordFormat::Ts, None) => strings(&["-c:v", "copy", "-c:a", "copy", "-map", "0", "-f", "mpegts"]),

            (RecordFormat::Mkv, Some(secs)) => strings(&[
                "-flags", "global_header", "-c:v", "copy", "-c:a", "aac", "-map", "0", "-f", "segment",
                "-segment_time", secs, "-segment_format", "matroska", "-reset_timestamps", "1",
            ]),
            (RecordFormat::Mkv, None) => strings(&[
                "-flags", "global_header", "-map", "0", "-c:v", "copy", "-c:a", "copy", "-f", "matroska",
            ]),

            (RecordFormat::Mp4, Some(secs)) => strings(&[
                "-c:v", "copy", "-c:a", "aac", "-map", "0", "-f", "segment",
                "-segment_time", secs, "-segment_format", "mp4", "-reset_timestamps", "1",
                "-movflags", "+frag_keyframe+empty_moov", "-flags", "global_header",
            ]),
            (RecordFormat::Mp4, None) => strings(&["-map", "0", "-c:v", "copy", "-c:a", "copy", "-f", "mp4"]),

            // flv is never segmented
            (RecordFormat::Flv, _) => strings(&[
                "-map", "0", "-c:v", "copy", "-c:a", "copy", "-bsf:a", "aac_adtstoasc", "-f", "flv",
            ]),

            (RecordFormat::Mov, Some(secs)) => strings(&[
                "-c:v", "copy", "-c:a", "aac", "-map", "0", "-f", "segment",
                "-segment_time", secs, "-segment_format", "mov", "-reset_timestamps", "1",
                "-movflags", "+frag_keyframe+empty_moov+faststart", "-flags", "global_header",
            ]),
            (RecordFormat::Mov, None) => strings(&[
                "-map", "0", "-c:v", "copy", "-c:a", "aac", "-f", "mov", "-movflags", "+faststart",
            ]),

            (RecordFormat::Mp3, Some(secs)) => strings(&[
                "-map", "0:a", "-c:a", "libmp3lame", "-ab", "320k", "-f", "segment",
                "-segment_time", secs, "-reset_timestamps", "1",
            ]),
            (RecordFormat::Mp3, None) => strings(&["-map", "0:a", "-c:a", "libmp3lame", "-ab", "320k", "-f", "mp3"]),

            (RecordFormat::M4a, Some(secs)) => strings(&[
                "-c:a", "aac", "-b:a", "320k", "-map", "0:a", "-f", "segment",
                "-segment_time", secs, "-reset_timestamps", "1",
            ]),
            (RecordFormat::M4a, None) => strings(&["-map", "0:a", "-c:a", "aac", "-b:a", "320k", "-f", "mp4"]),

            (RecordFormat::Wav, Some(secs)) => strings(&[
                "-c:a", "pcm_s16le", "-ar", "44100", "-ac", "2", "-map", "0:a", "-f", "segment",
                "-segment_time", secs, "-reset_timestamps", "1",
            ]),
            (RecordFormat::Wav, None) => strings(&[
                "-map", "0:a", "-c:a", "pcm_s16le", "-ar", "44100", "-ac", "2", "-f", "wav",
            ]),

            (RecordFormat::Aac, Some(secs)) => strings(&[
                "-c:a", "aac", "-ar", "44100", "-ac", "2", "-map", "0:a", "-f", "segment",
                "-segment_time", secs, "-segment_format", "adts", "-reset_timestamps", "1",
            ]),
            (RecordFormat::Aac, None) => strings(&[
                "-map", "0:a", "-c:a", "aac", "-ar", "44100", "-ac", "2", "-f", "ipod",
            ]),

            (RecordFormat::Wma, Some(secs)) => strings(&[
                "-map", "0:a", "-c:a", "wmav2", "-b:a", "320k", "-f", "segment",
                "-segment_time", secs, "-segment_format", "asf", "-reset_timestamps", "1",
            ]),
            (RecordFormat::Wma, None) => strings(&["-map", "0:a", "-c:a", "wmav2", "-b:a", "320k", "-f", "asf"]),
        }
    }
}

impl Default for FfmpegCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn build(&self, request: &CaptureRequest) -> Vec<String> {
        let mut args = self.input_args(request);
        args.extend(Self::output_args(request));
        args.push(request.output_path.to_string_lossy().into_owned());
        args
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Extra request header some platforms require for the media URL
pub fn record_headers(platform_key: &str, live_url: &str) -> Option<String> {
    let header = match platform_key {
        "pandalive" => "origin:https://www.pandalive.co.kr".to_string(),
        "winktv" => "origin:https://www.winktv.co.kr".to_string(),
        "popkontv" => "origin:https://www.popkontv.com".to_string(),
        "flextv" => "origin:https://www.flextv.co.kr".to_string(),
        "qiandurebo" => "referer:https://qiandurebo.com".to_string(),
        "17live" => "referer:https://17.live/en/live/6302408".to_string(),
        "lang" => "referer:https://www.lang.live".to_string(),
        "blued" => "referer:https://app.blued.cn".to_string(),
        "shopee" => {
            let domain: Vec<&str> = live_url.splitn(4, '/').take(3).collect();
            format!("origin:{}", domain.join("/"))
        }
        _ => return None,
    };
    Some(header)
}

/// Platforms whose media servers only answer plain http
const HTTP_ONLY_PLATFORMS: &[&str] = &["shopee"];

/// Adjust the media URL scheme for the platform and the https setting
pub fn record_url(media_url: &str, platform_key: &str, force_https: bool) -> String {
    let mut url = media_url.to_string();
    if HTTP_ONLY_PLATFORMS.contains(&platform_key) {
        url = url.replacen("https://", "http://", 1);
    }
    if force_https {
        if let Some(rest) = url.strip_prefix("http://") {
            url = format!("https://{}", rest);
        }
    }
    url
}
