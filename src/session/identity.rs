//! Static browser fingerprint pool.
//!
//! Each identity is internally consistent: the UA, client-hint headers,
//! viewport and touch capability all describe the same plausible device.
//! Identities are immutable and drawn with replacement at session creation.

use rand::seq::IndexedRandom;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Identity {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub sec_ch_ua: &'static str,
    pub sec_ch_ua_mobile: &'static str,
    pub sec_ch_ua_platform: &'static str,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
}

pub const IDENTITY_POOL: &[Identity] = &[
    Identity {
        name: "chrome-131-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        sec_ch_ua: r#""Chromium";v="131", "Not_A Brand";v="24", "Google Chrome";v="131""#,
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"Windows\"",
        viewport_width: 1920,
        viewport_height: 1080,
        device_scale_factor: 1.0,
        is_mobile: false,
        has_touch: false,
    },
    Identity {
        name: "chrome-131-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        sec_ch_ua: r#""Chromium";v="131", "Not_A Brand";v="24", "Google Chrome";v="131""#,
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"macOS\"",
        viewport_width: 1440,
        viewport_height: 900,
        device_scale_factor: 2.0,
        is_mobile: false,
        has_touch: false,
    },
    Identity {
        name: "chrome-130-linux",
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        sec_ch_ua: r#""Chromium";v="130", "Not_A Brand";v="24", "Google Chrome";v="130""#,
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"Linux\"",
        viewport_width: 1920,
        viewport_height: 1080,
        device_scale_factor: 1.0,
        is_mobile: false,
        has_touch: false,
    },
    Identity {
        name: "edge-131-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
        sec_ch_ua: r#""Chromium";v="131", "Not_A Brand";v="24", "Microsoft Edge";v="131""#,
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"Windows\"",
        viewport_width: 1536,
        viewport_height: 864,
        device_scale_factor: 1.25,
        is_mobile: false,
        has_touch: false,
    },
    Identity {
        name: "chrome-130-pixel-8-pro",
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.6723.58 Mobile Safari/537.36",
        sec_ch_ua: r#""Chromium";v="130", "Not_A Brand";v="24", "Google Chrome";v="130""#,
        sec_ch_ua_mobile: "?1",
        sec_ch_ua_platform: "\"Android\"",
        viewport_width: 412,
        viewport_height: 915,
        device_scale_factor: 3.0,
        is_mobile: true,
        has_touch: true,
    },
];

/// Draw a random identity, with replacement.
pub fn random_identity() -> &'static Identity {
    let mut rng = rand::rng();
    IDENTITY_POOL
        .choose(&mut rng)
        .unwrap_or(&IDENTITY_POOL[0])
}

/// Extra HTTP headers matching the identity's fingerprint.
pub fn stealth_headers(identity: &Identity) -> Vec<(&'static str, String)> {
    vec![
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .to_string(),
        ),
        ("Accept-Language", "en-US,en;q=0.9".to_string()),
        ("Accept-Encoding", "gzip, deflate, br".to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
        ("Sec-Fetch-Dest", "document".to_string()),
        ("Sec-Fetch-Mode", "navigate".to_string()),
        ("Sec-Fetch-Site", "none".to_string()),
        ("Sec-Fetch-User", "?1".to_string()),
        ("Sec-Ch-Ua", identity.sec_ch_ua.to_string()),
        ("Sec-Ch-Ua-Mobile", identity.sec_ch_ua_mobile.to_string()),
        ("Sec-Ch-Ua-Platform", identity.sec_ch_ua_platform.to_string()),
    ]
}
