//! JavaScript builders for locating and driving page controls.
//!
//! Every script is a self-contained IIFE. Locators are embedded as JSON so
//! selector and text values never need manual escaping.

use super::Locator;

/// Shared lookup: returns the first *visible* element for a locator, or null.
const FIND_FN: &str = r#"
const __lcVisible = (el) => {
    if (!el || !el.isConnected) return false;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
};
const __lcFind = (loc) => {
    let candidates = [];
    if (loc.by === 'css') {
        try { candidates = Array.from(document.querySelectorAll(loc.value)); } catch (e) { return null; }
    } else {
        const needle = loc.value.toLowerCase();
        const scope = loc.by === 'text'
            ? 'button, a, [role="button"], input[type="submit"], input[type="button"], label'
            : 'body *';
        candidates = Array.from(document.querySelectorAll(scope)).filter((el) => {
            const text = (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().toLowerCase();
            return text.includes(needle);
        });
    }
    return candidates.find(__lcVisible) || null;
};
"#;

fn locator_json(locator: &Locator) -> String {
    serde_json::to_string(locator).unwrap_or_else(|_| "null".to_string())
}

fn wrap(body: &str) -> String {
    format!("(() => {{ {FIND_FN} {body} }})()")
}

/// `true` when a visible element matches.
pub fn visible_script(locator: &Locator) -> String {
    wrap(&format!("return __lcFind({}) !== null;", locator_json(locator)))
}

/// Scroll to and click the match. `true` when clicked.
pub fn click_script(locator: &Locator) -> String {
    wrap(&format!(
        r#"const el = __lcFind({});
        if (!el) return false;
        el.scrollIntoView({{ block: 'center' }});
        el.click();
        return true;"#,
        locator_json(locator)
    ))
}

/// Set an input's value through the native setter so framework-managed
/// inputs observe the change, then fire `input` and `change`.
pub fn fill_script(locator: &Locator, value: &str) -> String {
    let value = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
    wrap(&format!(
        r#"const el = __lcFind({});
        if (!el) return false;
        el.focus();
        const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
        setter.call(el, {value});
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
        return true;"#,
        locator_json(locator)
    ))
}

/// Submit the form that encloses the match.
pub fn submit_script(locator: &Locator) -> String {
    wrap(&format!(
        r#"const el = __lcFind({});
        const form = el && el.closest('form');
        if (!form) return false;
        if (form.requestSubmit) {{ form.requestSubmit(); }} else {{ form.submit(); }}
        return true;"#,
        locator_json(locator)
    ))
}

/// Absolute link target of the match, or null.
pub fn href_script(locator: &Locator) -> String {
    wrap(&format!(
        r#"const el = __lcFind({});
        if (!el) return null;
        const raw = el.getAttribute('href') || el.getAttribute('data-href');
        if (!raw || raw.startsWith('javascript:') || raw === '#') return null;
        return new URL(raw, location.href).toString();"#,
        locator_json(locator)
    ))
}

pub const SNAPSHOT_SCRIPT: &str = r#"(() => ({
    url: location.href,
    title: document.title || '',
    excerpt: (document.body ? document.body.innerText : '').trim().slice(0, 500)
}))()"#;
