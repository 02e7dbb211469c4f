//! Bundled browser client.
//!
//! The page opens `/ws`, decodes every binary message as a `Float32Array`
//! and draws one scrolling trace per channel. The deployment's policy,
//! group width and starting group count are substituted into the page so
//! the client speaks the same flow-control dialect as the server.

use crate::config::SessionConfig;

const TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>scopecast</title>
</head>
<body>
<canvas id="scope" width="1000" height="500" style="border:1px solid #d3d3d3;">
Your browser does not support the HTML5 canvas tag.</canvas>
<div id="fps"></div>
<script>
"use strict";

const POLICY = "{{POLICY}}";
const CHANNELS = {{GROUP_WIDTH}};
const THRESHOLD_FPS = 10;
const WINDOW_MS = 5000;
const COLORS = ["#000000", "#FF0000", "#00FF00", "#0000FF", "#CCCCCC"];

const div = document.getElementById("fps");
const canvas = document.getElementById("scope");
const ctx = canvas.getContext("2d");
const laneHeight = canvas.height / CHANNELS;

let groups = {{GROUPS}};
let frames = 0;
let avgFps = 30;
let last = performance.now();
let data = new Float32Array(0);

const conn = new WebSocket("ws://" + window.location.host + "/ws");
conn.binaryType = "arraybuffer";

function request() {
    if (POLICY !== "interval") {
        conn.send(String(groups));
    }
}

function drawChannel(samples, top, color) {
    ctx.beginPath();
    ctx.strokeStyle = color;
    const step = canvas.width / Math.max(samples.length, 1);
    for (let i = 0; i < samples.length; i++) {
        const y = (top + 0.5 + samples[i]) | 0;
        if (i === 0) {
            ctx.moveTo(0, y);
        } else {
            ctx.lineTo(i * step, y);
        }
    }
    ctx.stroke();
}

function drawAll() {
    ctx.clearRect(0, 0, canvas.width, canvas.height);
    const len = Math.floor(data.length / CHANNELS);
    for (let c = 0; c < CHANNELS; c++) {
        drawChannel(data.subarray(c * len, (c + 1) * len), c * laneHeight, COLORS[c % COLORS.length]);
    }
    frames++;
    request();
}

conn.onopen = request;
conn.onmessage = function (e) {
    data = new Float32Array(e.data);
    window.requestAnimationFrame(drawAll);
};

setInterval(function () {
    const now = performance.now();
    const fps = frames / ((now - last) / 1000);
    last = now;
    frames = 0;
    avgFps = 0.25 * avgFps + 0.75 * fps;
    div.textContent = POLICY + " " + groups + ":" + (fps | 0) + ":" + (avgFps | 0);
}, 1000);

if (POLICY === "adaptive") {
    setInterval(function () {
        // Hold at 1 group so the stream never shrinks to empty frames
        if (avgFps < THRESHOLD_FPS && groups > 1) {
            groups = Math.floor(groups / 2);
        }
    }, WINDOW_MS);
}
</script>
</body>
</html>
"##;

/// Render the page for a deployment.
pub fn render(config: &SessionConfig) -> String {
    TEMPLATE
        .replace("{{POLICY}}", config.policy.as_str())
        .replace("{{GROUP_WIDTH}}", &config.group_width.to_string())
        .replace("{{GROUPS}}", &config.default_groups.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyKind;

    #[test]
    fn test_render_injects_settings() {
        let config = SessionConfig {
            policy: PolicyKind::Adaptive,
            group_width: 3,
            default_groups: 640,
            ..Default::default()
        };
        let page = render(&config);
        assert!(page.contains(r#"const POLICY = "adaptive";"#));
        assert!(page.contains("const CHANNELS = 3;"));
        assert!(page.contains("let groups = 640;"));
        assert!(!page.contains("{{"));
    }
}
