//! Built-in browser tool catalog.
//!
//! | Tool | Context | Required |
//! |------|---------|----------|
//! | `get_windows_and_tabs` | background | |
//! | `navigate` | background | `url` |
//! | `go_back_or_forward` | background | |
//! | `close_tabs` | background | |
//! | `screenshot` | background | |
//! | `network_capture_start` | background | |
//! | `network_capture_stop` | background | |
//! | `network_request` | background | `url` |
//! | `get_web_content` | content script | |
//! | `get_interactive_elements` | content script | |
//! | `click_element` | content script | |
//! | `fill_or_select` | content script | `selector`, `value` |
//! | `keyboard` | content script | `keys` |
//! | `history` | background | |
//! | `bookmark_search` | background | |
//! | `bookmark_add` | background | |
//! | `bookmark_delete` | background | |
//! | `search_tabs_content` | offscreen | `query` |
//! | `inject_script` | background | `jsScript` |
//! | `console` | background | |

use super::shape::{ArgumentShape, FieldKind};
use super::{ExecutionContext, ToolDescriptor};

use FieldKind::{Array, Boolean, Integer, Number, Object, String as Str, Url};

/// Returns the built-in tool descriptors.
#[must_use]
pub fn descriptors() -> Vec<ToolDescriptor> {
    use ExecutionContext::{Background, ContentScript, Offscreen};

    vec![
        // Windows & tabs
        ToolDescriptor::new(
            "get_windows_and_tabs",
            Background,
            "List all open windows and their tabs",
            ArgumentShape::new(),
        ),
        ToolDescriptor::new(
            "navigate",
            Background,
            "Open a URL in the current tab or a new one",
            ArgumentShape::new()
                .required("url", Url)
                .optional("newWindow", Boolean)
                .optional("width", Integer)
                .optional("height", Integer)
                .optional("refresh", Boolean),
        ),
        ToolDescriptor::new(
            "go_back_or_forward",
            Background,
            "Move through the tab's history",
            ArgumentShape::new()
                .optional("isForward", Boolean)
                .optional("tabId", Integer),
        ),
        ToolDescriptor::new(
            "close_tabs",
            Background,
            "Close tabs by id or URL",
            ArgumentShape::new()
                .optional("tabIds", Array)
                .optional("url", Url),
        ),
        // Capture
        ToolDescriptor::new(
            "screenshot",
            Background,
            "Capture the page or an element as an image",
            ArgumentShape::new()
                .optional("name", Str)
                .optional("selector", Str)
                .optional("width", Integer)
                .optional("height", Integer)
                .optional("fullPage", Boolean)
                .optional("storeBase64", Boolean)
                .optional("savePng", Boolean),
        ),
        ToolDescriptor::new(
            "network_capture_start",
            Background,
            "Start recording network requests",
            ArgumentShape::new()
                .optional("url", Url)
                .optional("maxCaptureTime", Integer)
                .optional("inactivityTimeout", Integer)
                .optional("includeStatic", Boolean),
        ),
        ToolDescriptor::new(
            "network_capture_stop",
            Background,
            "Stop recording and return captured requests",
            ArgumentShape::new(),
        ),
        ToolDescriptor::new(
            "network_request",
            Background,
            "Send an HTTP request with the browser's cookies",
            ArgumentShape::new()
                .required("url", Url)
                .optional("method", Str)
                .optional("headers", Object)
                .optional("body", Str)
                .optional("timeout", Integer),
        ),
        // Page content & interaction
        ToolDescriptor::new(
            "get_web_content",
            ContentScript,
            "Extract text or HTML from the page",
            ArgumentShape::new()
                .optional("url", Url)
                .optional("selector", Str)
                .optional("textContent", Boolean)
                .optional("htmlContent", Boolean),
        ),
        ToolDescriptor::new(
            "get_interactive_elements",
            ContentScript,
            "List clickable and fillable elements",
            ArgumentShape::new()
                .optional("textQuery", Str)
                .optional("selector", Str)
                .optional("includeCoordinates", Boolean),
        ),
        ToolDescriptor::new(
            "click_element",
            ContentScript,
            "Click an element by selector or coordinates",
            ArgumentShape::new()
                .optional("selector", Str)
                .optional("coordinates", Object)
                .optional("waitForNavigation", Boolean)
                .optional("timeout", Integer),
        ),
        ToolDescriptor::new(
            "fill_or_select",
            ContentScript,
            "Fill an input or choose a select option",
            ArgumentShape::new()
                .required("selector", Str)
                .required("value", Str),
        ),
        ToolDescriptor::new(
            "keyboard",
            ContentScript,
            "Send key presses or shortcuts",
            ArgumentShape::new()
                .required("keys", Str)
                .optional("selector", Str)
                .optional("delay", Number),
        ),
        // History & bookmarks
        ToolDescriptor::new(
            "history",
            Background,
            "Search browsing history",
            ArgumentShape::new()
                .optional("text", Str)
                .optional("startTime", Str)
                .optional("endTime", Str)
                .optional("maxResults", Integer)
                .optional("excludeCurrentTabs", Boolean),
        ),
        ToolDescriptor::new(
            "bookmark_search",
            Background,
            "Search bookmarks",
            ArgumentShape::new()
                .optional("query", Str)
                .optional("maxResults", Integer)
                .optional("folderPath", Str),
        ),
        ToolDescriptor::new(
            "bookmark_add",
            Background,
            "Bookmark a page",
            ArgumentShape::new()
                .optional("url", Url)
                .optional("title", Str)
                .optional("parentId", Str)
                .optional("createFolder", Boolean),
        ),
        ToolDescriptor::new(
            "bookmark_delete",
            Background,
            "Delete a bookmark by id or URL",
            ArgumentShape::new()
                .optional("bookmarkId", Str)
                .optional("url", Url)
                .optional("title", Str),
        ),
        // Semantic search
        ToolDescriptor::new(
            "search_tabs_content",
            Offscreen,
            "Semantic search over the content of open tabs",
            ArgumentShape::new().required("query", Str),
        ),
        // Scripts & console
        ToolDescriptor::new(
            "inject_script",
            Background,
            "Inject a script into a tab",
            ArgumentShape::new()
                .required("jsScript", Str)
                .optional("url", Url)
                .optional("type", Str),
        ),
        ToolDescriptor::new(
            "console",
            Background,
            "Capture console output from a tab",
            ArgumentShape::new()
                .optional("url", Url)
                .optional("includeExceptions", Boolean)
                .optional("maxMessages", Integer),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashSet;

    #[test]
    fn test_names_are_unique() {
        let all = descriptors();
        let names: FxHashSet<_> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.len(), all.len());
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn test_semantic_search_runs_offscreen() {
        let search = descriptors()
            .into_iter()
            .find(|d| d.name == "search_tabs_content")
            .expect("present");
        assert_eq!(search.context, ExecutionContext::Offscreen);
    }
}
