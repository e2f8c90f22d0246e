//! Embedded HTML pages served by catnip

use crate::oneko::{Project, ProjectVersion};

/// Render the landing page
pub fn home_page(oneko_url: &str) -> String {
    layout(
        "O-Neko Catnip",
        "",
        &format!(
            r#"<h1>O-Neko Catnip</h1>
        <p>This service wakes up O-Neko deployments when someone visits them.</p>
        <p><a href="{}">Go to O-Neko</a></p>"#,
            escape_html(oneko_url)
        ),
    )
}

/// Render the waiting page for a version that is being woken up.
///
/// The page polls `/api/status` for `redirect_to` every second and moves on
/// once the deployment answers.
pub fn wakeup_page(
    project: &Project,
    version: &ProjectVersion,
    redirect_to: Option<&str>,
    oneko_url: &str,
) -> String {
    let image_date = version
        .image_updated_date
        .map(|date| date.to_rfc2822())
        .unwrap_or_else(|| "unknown".to_string());

    let content = format!(
        r#"<h1>Waking up {project}</h1>
        <p>Version <strong>{version}</strong> (image from {date}) is starting.</p>
        <p id="status">Waiting for the deployment to become ready&hellip;</p>
        <p><a href="{oneko}">Go to O-Neko</a></p>
        <script>{script}</script>"#,
        project = escape_html(&project.name),
        version = escape_html(&version.name),
        date = escape_html(&image_date),
        oneko = escape_html(oneko_url),
        script = WAKEUP_SCRIPT,
    );

    let title = format!("Waking up {}", version.name);
    layout(&title, redirect_to.unwrap_or_default(), &content)
}

/// Render an error page
pub fn error_page(message: &str, oneko_url: &str) -> String {
    layout(
        "O-Neko Catnip - Error",
        "",
        &format!(
            r#"<h1>Something went wrong</h1>
        <p class="error">{}</p>
        <p><a href="{}">Go to O-Neko</a></p>"#,
            escape_html(message),
            escape_html(oneko_url)
        ),
    )
}

fn layout(title: &str, redirect_to: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{}</title>
    <style>{}</style>
</head>
<body data-redirect-to="{}">
    <main>
        {}
    </main>
</body>
</html>"#,
        escape_html(title),
        STYLE,
        escape_html(redirect_to),
        content
    )
}

/// Escape text for use in HTML bodies and quoted attributes
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; background: #f5f5f7; color: #1d1d1f; }
main { max-width: 40rem; margin: 10vh auto; padding: 2rem; background: #fff; border-radius: 8px; }
.error { color: #b00020; }
a { color: #0060df; }
"#;

const WAKEUP_SCRIPT: &str = r#"
(function () {
    // Give the ingress time to settle once the backend answers
    var REDIRECT_DELAY_MS = 6000;
    var target = document.body.getAttribute("data-redirect-to");
    var status = document.getElementById("status");
    if (!target) {
        return;
    }

    function retry() {
        setTimeout(check, 1000);
    }

    function check() {
        fetch("/api/status?deploymentUrl=" + encodeURIComponent(target))
            .then(function (response) {
                if (response.status > 500) {
                    retry();
                    return null;
                }
                return response.json();
            })
            .then(function (body) {
                if (body === null) {
                    return;
                }
                if (body.status === "Ready") {
                    status.textContent = "Ready, redirecting…";
                    setTimeout(function () {
                        window.location.replace(target);
                    }, REDIRECT_DELAY_MS);
                    return;
                }
                if (body.status === "Error") {
                    console.log("deployment status check failed: " + body.errorMessage);
                }
                retry();
            })
            .catch(function () {
                retry();
            });
    }

    check();
})();
"#;
