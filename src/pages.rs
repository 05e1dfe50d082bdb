//! Server-rendered HTML pages.
//!
//! Every interpolated value goes through `html_escape`. Element ids follow
//! `{kind}-{version_id}-{idx}` so `static/main.js` can patch vote counts and
//! notes in place when a live update arrives.

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use serde::Serialize;
use url::form_urlencoded;

use crate::config::FirebaseWebConfig;
use crate::schema::{sanitize_user_key, RatingResult, TaskGroup, TaskVersion, VoteKind};

/// Serialize a value for embedding inside a `<script>` element.
fn script_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
}

fn page(title: &str, body: &str, boot: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="/static/style.css">
</head>
<body>
{body}
<script>{boot}</script>
<script src="/static/main.js"></script>
</body>
</html>"#,
        title = text(title),
        body = body,
        boot = boot,
    )
}

pub struct LoginPage<'a> {
    pub web: &'a FirebaseWebConfig,
}

impl LoginPage<'_> {
    pub fn render(&self) -> String {
        let body = r#"<main class="login-card">
    <h1>Task Rater Board</h1>
    <p class="subtitle">Sign in to save tasks, vote and leave notes.</p>
    <form method="get" action="/" class="login-form">
        <input type="email" name="u" placeholder="you@example.com" required autofocus>
        <button type="submit" class="btn-primary">Continue</button>
    </form>
    <p><a href="/">Browse without signing in</a></p>
</main>"#;
        let boot = format!("window.FIREBASE_CONFIG = {};", script_json(self.web));
        page("Login - Task Rater Board", body, &boot)
    }
}

pub struct HomePage<'a> {
    /// Normalized email, empty when signed out.
    pub user: &'a str,
    pub message: &'a str,
    pub search: Option<&'a str>,
    pub tasks: &'a [TaskGroup],
    pub web: &'a FirebaseWebConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Boot<'a> {
    user: &'a str,
    user_key: String,
    task_ids: Vec<&'a str>,
    firebase: &'a FirebaseWebConfig,
}

impl HomePage<'_> {
    pub fn render(&self) -> String {
        let mut body = String::new();
        body.push_str(&self.render_header());

        if !self.message.is_empty() {
            body.push_str(&format!(
                "<div class=\"message\">{}</div>\n",
                text(self.message)
            ));
        }

        body.push_str(&self.render_forms());

        if self.tasks.is_empty() {
            body.push_str("<p class=\"empty\">No tasks found.</p>\n");
        }
        for (group_idx, task) in self.tasks.iter().enumerate() {
            body.push_str(&self.render_task(group_idx, task));
        }

        let boot = Boot {
            user: self.user,
            user_key: sanitize_user_key(self.user),
            task_ids: self.tasks.iter().map(|t| t.task_id.as_str()).collect(),
            firebase: self.web,
        };
        page(
            "Task Rater Board",
            &format!("<main class=\"container\">\n{}</main>", body),
            &format!("window.APP = {};", script_json(&boot)),
        )
    }

    fn render_header(&self) -> String {
        let account = if self.user.is_empty() {
            "<a href=\"/login\" class=\"btn-mini\">Log in</a>".to_string()
        } else {
            format!(
                "<span class=\"user\">{}</span> <a href=\"/login\" class=\"btn-mini\">Switch user</a>",
                text(self.user)
            )
        };
        format!(
            "<header class=\"top\">\n    <h1>Task Rater Board</h1>\n    <div class=\"account\">{}</div>\n</header>\n",
            account
        )
    }

    fn render_forms(&self) -> String {
        let action = if self.user.is_empty() {
            "/".to_string()
        } else {
            let user: String = form_urlencoded::byte_serialize(self.user.as_bytes()).collect();
            format!("/?u={}", user)
        };
        format!(
            r#"<section class="forms">
    <form method="post" action="{action}" class="paste-form">
        <textarea name="raw_text" rows="8" placeholder="Paste a task export here"></textarea>
        <input type="hidden" name="user_email" value="{user}">
        <button type="submit" class="btn-primary">Save version</button>
    </form>
    <form method="post" action="{action}" class="search-form">
        <input type="text" name="search_query" value="{search}" placeholder="Search by task id or query">
        <button type="submit" class="btn-mini">Search</button>
    </form>
</section>
"#,
            action = attr(&action),
            user = attr(self.user),
            search = attr(self.search.unwrap_or_default()),
        )
    }

    fn render_task(&self, group_idx: usize, task: &TaskGroup) -> String {
        let mut html = format!(
            "<article class=\"task\" data-task=\"{}\">\n    <h2>{} <span class=\"query\">{}</span></h2>\n    <table class=\"headers\">\n",
            attr(&task.task_id),
            text(&task.task_id),
            text(&task.query),
        );
        for (label, value) in task.headers.rows() {
            html.push_str(&format!(
                "        <tr><th>{}</th><td>{}</td></tr>\n",
                text(label),
                text(value)
            ));
        }
        html.push_str("    </table>\n    <div class=\"tabs\">\n");

        for (v_idx, version) in task.versions.iter().enumerate() {
            html.push_str(&format!(
                "        <button class=\"tab-btn{active}\" data-action=\"tab\" data-group=\"{group}\" data-tab=\"tab-{group}-{v}\">V{num} &middot; {author}</button>\n",
                active = if v_idx == 0 { " active" } else { "" },
                group = group_idx,
                v = v_idx,
                num = v_idx + 1,
                author = text(author_name(&version.author)),
            ));
        }
        html.push_str("    </div>\n");

        for (v_idx, version) in task.versions.iter().enumerate() {
            html.push_str(&format!(
                "    <section id=\"tab-{group}-{v}\" class=\"tab-content group-{group}{active}\">\n",
                group = group_idx,
                v = v_idx,
                active = if v_idx == 0 { " active" } else { "" },
            ));
            for (idx, result) in version.results.iter().enumerate() {
                html.push_str(&self.render_result(task, version, idx, result));
            }
            html.push_str("    </section>\n");
        }
        html.push_str("</article>\n");
        html
    }

    fn render_result(
        &self,
        task: &TaskGroup,
        version: &TaskVersion,
        idx: usize,
        result: &RatingResult,
    ) -> String {
        let ver = attr(&version.db_id);
        let data = format!(
            "data-task=\"{}\" data-ver=\"{}\" data-idx=\"{}\"",
            attr(&task.task_id),
            ver,
            idx
        );
        let user_key = sanitize_user_key(self.user);
        let my_vote = result.voters.get(&user_key).copied();

        let mut html = format!(
            "        <div id=\"res-{ver}-{idx}\" class=\"result{caution}\">\n            <div class=\"res-head\"><span class=\"res-num\">{num}.</span> <strong>{title}</strong>",
            ver = ver,
            idx = idx,
            caution = if result.is_contested() { " res-caution" } else { "" },
            num = text(&result.num),
            title = text(&result.title),
        );
        if !result.subtitle.is_empty() {
            html.push_str(&format!(
                " <span class=\"res-sub\">{}</span>",
                text(&result.subtitle)
            ));
        }
        html.push_str("</div>\n            <table class=\"meta\">\n");
        for m in &result.meta {
            html.push_str(&format!(
                "                <tr><th>{}</th><td>{}</td></tr>\n",
                text(&m.label),
                text(&m.value)
            ));
        }
        html.push_str(&format!(
            "            </table>\n            <div id=\"ratings-{ver}-{idx}\" class=\"ratings\">\n",
            ver = ver,
            idx = idx
        ));
        for r in &result.ratings {
            html.push_str(&format!(
                "                <div class=\"rating-row\"><span class=\"r-label\">{}</span> <span class=\"r-val\">{}</span></div>\n",
                text(&r.label),
                text(&r.value)
            ));
        }
        html.push_str("            </div>\n");

        html.push_str(&format!(
            r#"            <div class="actions">
                <button id="btn-up-{ver}-{idx}" class="btn-vote{up_active}" data-action="vote" data-type="up" {data}>&#9650; <span id="up-{ver}-{idx}">{up}</span></button>
                <button id="btn-down-{ver}-{idx}" class="btn-vote{down_active}" data-action="vote" data-type="down" {data}>&#9660; <span id="down-{ver}-{idx}">{down}</span></button>
                <button class="btn-mini" data-action="toggle-note" {data}>Note</button>
                <button class="btn-mini author-btn" data-author="{author}" data-action="edit" {data}>Edit</button>
            </div>
            <div id="notes-{ver}-{idx}" class="notes">
"#,
            ver = ver,
            idx = idx,
            data = data,
            up = result.upvotes,
            down = result.downvotes,
            up_active = if my_vote == Some(VoteKind::Up) { " vote-active-up" } else { "" },
            down_active = if my_vote == Some(VoteKind::Down) { " vote-active-down" } else { "" },
            author = attr(&version.author),
        ));

        for (note_id, note) in &result.notes {
            let delete = if !self.user.is_empty() && note.user.eq_ignore_ascii_case(self.user) {
                format!(
                    "<span class=\"del-note-btn\" data-action=\"delete-note\" data-note=\"{}\" {} title=\"Delete\">&times;</span>",
                    attr(note_id),
                    data
                )
            } else {
                String::new()
            };
            html.push_str(&format!(
                "                <div class=\"note-item\"><div><span class=\"note-user\">{}:</span> <span>{}</span></div>{}</div>\n",
                text(author_name(&note.user)),
                text(&note.text),
                delete
            ));
        }

        html.push_str(&format!(
            r#"            </div>
            <div id="note-input-{ver}-{idx}" class="note-input">
                <input type="text" id="txt-note-{ver}-{idx}" placeholder="Add a note">
                <button class="btn-mini" data-action="save-note" {data}>Post</button>
            </div>
        </div>
"#,
            ver = ver,
            idx = idx,
            data = data,
        ));
        html
    }
}

/// Local part of an email, for compact display.
fn author_name(email: &str) -> &str {
    match email.split('@').next() {
        Some(name) if !name.is_empty() => name,
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LabeledValue, Note, TaskHeaders};
    use std::collections::BTreeMap;

    fn group() -> TaskGroup {
        let mut voters = BTreeMap::new();
        voters.insert("bob@example,com".to_string(), VoteKind::Down);
        let mut notes = BTreeMap::new();
        notes.insert(
            "n1".to_string(),
            Note {
                user: "bob@example.com".to_string(),
                text: "<b>wrong pin</b>".to_string(),
                timestamp: 0,
            },
        );
        TaskGroup {
            task_id: "T-1".to_string(),
            headers: TaskHeaders::default(),
            query: "pizza & beer".to_string(),
            versions: vec![TaskVersion {
                db_id: "v1".to_string(),
                results: vec![RatingResult {
                    num: "1".to_string(),
                    title: "Joe's <Pizza>".to_string(),
                    subtitle: String::new(),
                    meta: vec![LabeledValue::new("Category", "Pizza")],
                    ratings: vec![LabeledValue::new("Relevance", "Good")],
                    upvotes: 0,
                    downvotes: 1,
                    voters,
                    notes,
                }],
                author: "ann@example.com".to_string(),
                timestamp: 0,
            }],
        }
    }

    #[test]
    fn test_home_escapes_user_content() {
        let tasks = vec![group()];
        let web = FirebaseWebConfig::default();
        let html = HomePage {
            user: "bob@example.com",
            message: "",
            search: None,
            tasks: &tasks,
            web: &web,
        }
        .render();

        assert!(html.contains("Joe&#x27;s &lt;Pizza&gt;") || html.contains("Joe's &lt;Pizza&gt;"));
        assert!(html.contains("&lt;b&gt;wrong pin&lt;/b&gt;"));
        assert!(!html.contains("<b>wrong pin</b>"));
        assert!(html.contains("pizza &amp; beer"));
    }

    #[test]
    fn test_home_marks_votes_and_own_notes() {
        let tasks = vec![group()];
        let web = FirebaseWebConfig::default();
        let html = HomePage {
            user: "bob@example.com",
            message: "Saved",
            search: Some("pizza"),
            tasks: &tasks,
            web: &web,
        }
        .render();

        assert!(html.contains("id=\"res-v1-0\" class=\"result res-caution\""));
        assert!(html.contains("btn-vote vote-active-down"));
        assert!(html.contains("data-action=\"delete-note\""));
        assert!(html.contains("<div class=\"message\">Saved</div>"));
        assert!(html.contains("\"taskIds\":[\"T-1\"]"));
    }

    #[test]
    fn test_no_delete_button_for_other_users() {
        let tasks = vec![group()];
        let web = FirebaseWebConfig::default();
        let html = HomePage {
            user: "ann@example.com",
            message: "",
            search: None,
            tasks: &tasks,
            web: &web,
        }
        .render();
        assert!(!html.contains("data-action=\"delete-note\""));
    }

    #[test]
    fn test_form_action_encodes_user() {
        let web = FirebaseWebConfig::default();
        let html = HomePage {
            user: "a+b#c&d@example.com",
            message: "",
            search: None,
            tasks: &[],
            web: &web,
        }
        .render();
        assert!(html.contains("action=\"/?u=a%2Bb%23c%26d%40example.com\""));
    }

    #[test]
    fn test_script_json_cannot_close_script() {
        assert_eq!(script_json(&"</script>"), "\"\\u003c/script>\"");
    }

    #[test]
    fn test_author_name() {
        assert_eq!(author_name("ann@example.com"), "ann");
        assert_eq!(author_name(""), "unknown");
    }
}
