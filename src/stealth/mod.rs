//! Anti-detection surface: fingerprint masking, human-interaction
//! emulation, and the interactive-challenge solver.
//!
//! Stealth model:
//! - Process-level defaults (browser flags, identity-matched UA/viewport)
//!   are applied by `session` at launch.
//! - JS-level masking is registered via `Page.addScriptToEvaluateOnNewDocument`
//!   so it runs before any page script on *every* navigation in the session,
//!   not just the first.
//!
//! None of this is a correctness proof against a third party's defenses;
//! it is a best-effort interaction pattern.

pub mod challenge;
pub mod humanize;

/// Browser flags that suppress the most common automation tells.
pub const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-notifications",
    "--disable-crash-reporter",
    "--disable-breakpad",
    "--use-gl=swiftshader",
    "--mute-audio",
];

/// Fingerprint-masking init script, registered once per session and
/// effective for the life of the context.
///
/// Masks: `navigator.webdriver`, empty plugin/language lists, WebGL
/// vendor/renderer strings, and the missing `window.chrome.runtime`.
pub fn mask_script() -> &'static str {
    r#"
// Fingerprint masking, must run before any page script.
(() => {
    try {
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
        try { delete navigator.webdriver; } catch (e) {}

        Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
        Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });

        if (!window.chrome) { window.chrome = {}; }
        if (!window.chrome.runtime) { window.chrome.runtime = {}; }
    } catch (e) {}
})();

// WebGL vendor/renderer spoofing (SwiftShader masking)
const getParameter = WebGLRenderingContext.prototype.getParameter;
WebGLRenderingContext.prototype.getParameter = function (parameter) {
    if (parameter === 37445) return 'Intel Inc.';
    if (parameter === 37446) return 'Intel Iris OpenGL Engine';
    return getParameter.apply(this, arguments);
};

if (typeof WebGL2RenderingContext !== 'undefined') {
    const getParameter2 = WebGL2RenderingContext.prototype.getParameter;
    WebGL2RenderingContext.prototype.getParameter = function (parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter2.apply(this, arguments);
    };
}
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_script_covers_known_tells() {
        let script = mask_script();
        assert!(script.contains("webdriver"));
        assert!(script.contains("plugins"));
        assert!(script.contains("languages"));
        assert!(script.contains("37445")); // UNMASKED_VENDOR_WEBGL
        assert!(script.contains("37446")); // UNMASKED_RENDERER_WEBGL
        assert!(script.contains("chrome.runtime"));
    }

    #[test]
    fn test_stealth_args_hide_automation_flag() {
        assert!(STEALTH_ARGS
            .iter()
            .any(|a| a.contains("AutomationControlled")));
    }
}
