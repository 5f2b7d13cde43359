use std::fmt;
use std::time::Instant;

use boa_engine::{Context, JsObject, JsString, JsValue, Source, js_string};
use url::Url;

use super::{DocumentId, HostError, HostValue, ObjectKind, ScriptHost};

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
const MAX_TIMER_TURNS: u32 = 10_000;

/// Reference to an object living inside a [`BoaPage`]. Equality is object
/// identity.
#[derive(Debug, Clone)]
pub struct BoaObject(JsObject);

impl BoaObject {
    pub fn inner(&self) -> &JsObject {
        &self.0
    }
}

impl PartialEq for BoaObject {
    fn eq(&self, other: &Self) -> bool {
        JsObject::equals(&self.0, &other.0)
    }
}

/// Prelude helpers resolved once per loaded document.
struct Helpers {
    window: JsObject,
    invoke: JsObject,
    kind_of: JsObject,
    identity_of: JsObject,
    property_names: JsObject,
    run_timers: JsObject,
    take_navigation: JsObject,
}

/// A single browsing context backed by the Boa JavaScript engine.
///
/// The prelude provides a `window` global, a small element tree under
/// `document`, `setTimeout`/`clearTimeout` driven by a millisecond clock and a
/// `location` object whose `reload()`, `assign()` and `href` setter request a
/// navigation. Timers and navigations only make progress in
/// [`ScriptHost::yield_to_page`]; a navigation rebuilds the whole context and
/// mints a new [`DocumentId`].
pub struct BoaPage {
    context: Context,
    helpers: Helpers,
    document: DocumentId,
    url: String,
    setup: Option<String>,
    loaded_at: Instant,
}

impl BoaPage {
    /// Load an empty `about:blank` document.
    pub fn new() -> Result<Self, HostError> {
        Self::load("about:blank", None)
    }

    /// Load a document and run `setup` against it. The setup script is run
    /// again after every navigation, standing in for the page's own markup.
    pub fn with_setup(setup: impl Into<String>) -> Result<Self, HostError> {
        Self::load("about:blank", Some(setup.into()))
    }

    fn load(url: &str, setup: Option<String>) -> Result<Self, HostError> {
        let url = resolve_url(None, url)?;
        let url = url.as_str();
        let (context, helpers) = build_context(url, setup.as_deref())?;
        let document = DocumentId::next();
        log::debug!("loaded {document} at {url}");
        Ok(Self {
            context,
            helpers,
            document,
            url: url.to_string(),
            setup,
            loaded_at: Instant::now(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replace the current document with a fresh one at `url`, resolved
    /// against the current location when relative.
    pub fn navigate(&mut self, url: &str) -> Result<(), HostError> {
        let target = resolve_url(Some(&self.url), url)?;
        let url = target.as_str();
        let (context, helpers) = build_context(url, self.setup.as_deref())?;
        let previous = self.document;
        self.context = context;
        self.helpers = helpers;
        self.document = DocumentId::next();
        self.url = url.to_string();
        self.loaded_at = Instant::now();
        log::debug!("navigated {previous} -> {} at {url}", self.document);
        Ok(())
    }

    pub fn reload(&mut self) -> Result<(), HostError> {
        let url = self.url.clone();
        self.navigate(&url)
    }

    /// Evaluate arbitrary script text in the page, outside of any driver
    /// command. Useful to build up page state.
    pub fn evaluate(&mut self, script: &str) -> Result<HostValue<BoaObject>, HostError> {
        let value = self
            .context
            .eval(Source::from_bytes(script))
            .map_err(|err| HostError::Thrown {
                description: Some(err.to_string()),
            })?;
        Ok(from_js(&value))
    }

    fn clock(&self) -> f64 {
        self.loaded_at.elapsed().as_secs_f64() * 1000.0
    }

    fn run_due_timers(&mut self) {
        let args = [
            JsValue::from(self.clock()),
            JsValue::from(f64::from(MAX_TIMER_TURNS)),
        ];
        match call(&mut self.context, &self.helpers.run_timers, &args) {
            Ok(ran) => {
                if let Some(count) = ran.as_number()
                    && count > 0.0
                {
                    log::trace!("{} ran {count} timer task(s)", self.document);
                }
            }
            Err(err) => log::warn!("{} timer pump failed: {err}", self.document),
        }
    }

    fn pending_navigation(&mut self) -> Option<String> {
        match call(&mut self.context, &self.helpers.take_navigation, &[]) {
            Ok(target) => target.as_string().map(|url| url.to_std_string_escaped()),
            Err(err) => {
                log::warn!("{} navigation check failed: {err}", self.document);
                None
            }
        }
    }
}

impl fmt::Debug for BoaPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoaPage")
            .field("document", &self.document)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl ScriptHost for BoaPage {
    type Object = BoaObject;

    fn document_id(&self) -> DocumentId {
        self.document
    }

    fn compile_function(&mut self, source: &str) -> Result<BoaObject, HostError> {
        let value = self
            .context
            .eval(Source::from_bytes(source))
            .map_err(|err| HostError::Compilation(err.to_string()))?;

        value
            .as_object()
            .map(|object| object.clone())
            .filter(|object| object.is_callable())
            .map(BoaObject)
            .ok_or_else(|| HostError::Compilation("script did not evaluate to a function".into()))
    }

    fn call_function(
        &mut self,
        function: &BoaObject,
        receiver: &HostValue<BoaObject>,
        args: &[HostValue<BoaObject>],
    ) -> Result<HostValue<BoaObject>, HostError> {
        let mut call_args = Vec::with_capacity(args.len() + 3);
        call_args.push(JsValue::from(self.clock()));
        call_args.push(JsValue::from(function.0.clone()));
        call_args.push(to_js(receiver)?);
        for arg in args {
            call_args.push(to_js(arg)?);
        }

        let outcome = call(&mut self.context, &self.helpers.invoke, &call_args)?;
        let record = outcome
            .as_object()
            .map(|object| object.clone())
            .ok_or_else(|| HostError::Binding("invoke trampoline returned a primitive".into()))?;

        let threw = record
            .get(js_string!("threw"), &mut self.context)
            .map_err(|err| HostError::Binding(err.to_string()))?;
        if threw.as_boolean() == Some(true) {
            let description = record
                .get(js_string!("description"), &mut self.context)
                .map_err(|err| HostError::Binding(err.to_string()))?;
            let description = description
                .as_string()
                .map(|text| text.to_std_string_escaped())
                .filter(|text| !text.is_empty());
            return Err(HostError::Thrown { description });
        }

        let value = record
            .get(js_string!("value"), &mut self.context)
            .map_err(|err| HostError::Binding(err.to_string()))?;
        Ok(from_js(&value))
    }

    fn window(&mut self) -> Result<BoaObject, HostError> {
        Ok(BoaObject(self.helpers.window.clone()))
    }

    fn object_kind(&mut self, object: &BoaObject) -> Result<ObjectKind, HostError> {
        let tag = call(
            &mut self.context,
            &self.helpers.kind_of,
            &[JsValue::from(object.0.clone())],
        )?;
        let tag = tag
            .as_string()
            .map(|text| text.to_std_string_escaped())
            .ok_or_else(|| HostError::Binding("kind helper returned a non-string".into()))?;

        Ok(match tag.as_str() {
            "array" => ObjectKind::Array,
            "collection" => ObjectKind::ElementCollection,
            "element" => ObjectKind::Element,
            "object" => ObjectKind::ScriptObject,
            _ => ObjectKind::Dispatchable(tag),
        })
    }

    fn object_identity(&mut self, object: &BoaObject) -> Result<u64, HostError> {
        let identity = call(
            &mut self.context,
            &self.helpers.identity_of,
            &[JsValue::from(object.0.clone())],
        )?;
        identity
            .as_number()
            .filter(|value| *value >= 1.0)
            .map(|value| value as u64)
            .ok_or_else(|| HostError::Binding("identity helper returned a non-number".into()))
    }

    fn property_names(&mut self, object: &BoaObject) -> Result<Vec<String>, HostError> {
        let encoded = call(
            &mut self.context,
            &self.helpers.property_names,
            &[JsValue::from(object.0.clone())],
        )?;
        let encoded = encoded
            .as_string()
            .map(|text| text.to_std_string_escaped())
            .ok_or_else(|| HostError::Binding("property name helper returned a non-string".into()))?;
        serde_json::from_str(&encoded).map_err(|err| HostError::Binding(err.to_string()))
    }

    fn yield_to_page(&mut self) {
        self.run_due_timers();
        if let Some(target) = self.pending_navigation()
            && let Err(err) = self.navigate(&target)
        {
            log::warn!("navigation to {target} failed: {err}");
        }
    }
}

fn resolve_url(base: Option<&str>, target: &str) -> Result<Url, HostError> {
    let invalid = |err: url::ParseError| HostError::Binding(format!("invalid url {target}: {err}"));
    match (Url::parse(target), base) {
        (Ok(url), _) => Ok(url),
        (Err(url::ParseError::RelativeUrlWithoutBase), Some(base)) => Url::parse(base)
            .and_then(|base| base.join(target))
            .map_err(invalid),
        (Err(err), _) => Err(invalid(err)),
    }
}

fn build_context(url: &str, setup: Option<&str>) -> Result<(Context, Helpers), HostError> {
    let mut context = Context::default();
    context
        .eval(Source::from_bytes(&build_prelude(url)))
        .map_err(|err| HostError::Binding(err.to_string()))?;

    let helpers = Helpers {
        window: global_object(&mut context, "window")?,
        invoke: global_object(&mut context, "__webdriverInvoke")?,
        kind_of: global_object(&mut context, "__webdriverKindOf")?,
        identity_of: global_object(&mut context, "__webdriverIdentityOf")?,
        property_names: global_object(&mut context, "__webdriverPropertyNames")?,
        run_timers: global_object(&mut context, "__webdriverRunTimers")?,
        take_navigation: global_object(&mut context, "__webdriverTakeNavigation")?,
    };

    if let Some(script) = setup {
        context
            .eval(Source::from_bytes(script))
            .map_err(|err| HostError::Compilation(err.to_string()))?;
    }

    Ok((context, helpers))
}

fn global_object(context: &mut Context, name: &str) -> Result<JsObject, HostError> {
    let value = context
        .eval(Source::from_bytes(name))
        .map_err(|err| HostError::Binding(err.to_string()))?;
    value
        .as_object()
        .map(|object| object.clone())
        .ok_or_else(|| HostError::Binding(format!("prelude global `{name}` is missing")))
}

fn call(context: &mut Context, function: &JsObject, args: &[JsValue]) -> Result<JsValue, HostError> {
    function
        .call(&JsValue::undefined(), args, context)
        .map_err(|err| HostError::Binding(err.to_string()))
}

fn to_js(value: &HostValue<BoaObject>) -> Result<JsValue, HostError> {
    Ok(match value {
        HostValue::Undefined => JsValue::undefined(),
        HostValue::Null => JsValue::null(),
        HostValue::Boolean(flag) => JsValue::from(*flag),
        HostValue::Integer(number) => JsValue::from(*number as f64),
        HostValue::Double(number) => JsValue::from(*number),
        HostValue::String(text) => JsValue::from(JsString::from(text.as_str())),
        HostValue::Object(object) => JsValue::from(object.0.clone()),
        HostValue::Unsupported(description) => {
            return Err(HostError::Binding(format!(
                "cannot pass unsupported value to the page: {description}"
            )));
        }
    })
}

fn from_js(value: &JsValue) -> HostValue<BoaObject> {
    if value.is_undefined() {
        return HostValue::Undefined;
    }
    if value.is_null() {
        return HostValue::Null;
    }
    if let Some(flag) = value.as_boolean() {
        return HostValue::Boolean(flag);
    }
    if let Some(text) = value.as_string() {
        return HostValue::String(text.to_std_string_escaped());
    }
    if let Some(number) = value.as_number() {
        return number_value(number);
    }
    if let Some(object) = value.as_object().map(|object| object.clone()) {
        return HostValue::Object(BoaObject(object));
    }
    HostValue::Unsupported("value is neither a primitive nor an object".into())
}

fn number_value(number: f64) -> HostValue<BoaObject> {
    let integral = number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER;
    if integral && !(number == 0.0 && number.is_sign_negative()) {
        HostValue::Integer(number as i64)
    } else {
        HostValue::Double(number)
    }
}

fn build_prelude(url: &str) -> String {
    let href = serde_json::to_string(url).unwrap_or_else(|_| "\"about:blank\"".to_string());
    format!(
        r#"
var window = globalThis;
var __webdriverClock = {{ now: 0 }};
var __webdriverTimers = {{ nextId: 1, queue: [] }};
var __webdriverNavigation = {{ pending: false, url: null }};
var __webdriverIdentities = new WeakMap();
var __webdriverNextIdentity = 1;

function setTimeout(fn, delay) {{
    var id = __webdriverTimers.nextId++;
    var wait = Number(delay) || 0;
    if (wait < 0) {{ wait = 0; }}
    __webdriverTimers.queue.push({{ id: id, due: __webdriverClock.now + wait, fn: fn }});
    return id;
}}
function clearTimeout(id) {{
    __webdriverTimers.queue = __webdriverTimers.queue.filter(function (timer) {{
        return timer.id !== id;
    }});
}}

function Element(tagName) {{
    this.tagName = String(tagName).toUpperCase();
    this.id = "";
    this.textContent = "";
    this.parentNode = null;
    this.children = [];
    this.attributes = {{}};
}}
Element.prototype.appendChild = function (child) {{
    if (child.parentNode) {{ child.parentNode.removeChild(child); }}
    child.parentNode = this;
    this.children.push(child);
    return child;
}};
Element.prototype.removeChild = function (child) {{
    var index = this.children.indexOf(child);
    if (index >= 0) {{
        this.children.splice(index, 1);
        child.parentNode = null;
    }}
    return child;
}};
Element.prototype.setAttribute = function (name, value) {{
    this.attributes[name] = String(value);
    if (name === "id") {{ this.id = String(value); }}
}};
Element.prototype.getAttribute = function (name) {{
    return Object.prototype.hasOwnProperty.call(this.attributes, name) ? this.attributes[name] : null;
}};

function NodeList(items) {{
    for (var i = 0; i < items.length; i++) {{ this[i] = items[i]; }}
    Object.defineProperty(this, "length", {{ value: items.length }});
}}
NodeList.prototype.item = function (index) {{
    return index < this.length ? this[index] : null;
}};

function __webdriverCollect(root, predicate) {{
    var found = [];
    (function walk(node) {{
        for (var i = 0; i < node.children.length; i++) {{
            var child = node.children[i];
            if (predicate(child)) {{ found.push(child); }}
            walk(child);
        }}
    }})(root);
    return found;
}}

function HTMLDocument() {{
    this.documentElement = new Element("html");
    this.body = this.documentElement.appendChild(new Element("body"));
    this.defaultView = window;
}}
HTMLDocument.prototype.createElement = function (tagName) {{
    return new Element(tagName);
}};
HTMLDocument.prototype.getElementById = function (id) {{
    var found = __webdriverCollect(this.documentElement, function (el) {{ return el.id === id; }});
    return found.length > 0 ? found[0] : null;
}};
HTMLDocument.prototype.getElementsByTagName = function (tagName) {{
    var wanted = String(tagName).toUpperCase();
    return new NodeList(__webdriverCollect(this.documentElement, function (el) {{
        return wanted === "*" || el.tagName === wanted;
    }}));
}};
var document = new HTMLDocument();

var location = {{
    reload: function () {{ __webdriverNavigation.pending = true; }},
    assign: function (url) {{
        __webdriverNavigation.pending = true;
        __webdriverNavigation.url = String(url);
    }}
}};
Object.defineProperty(location, "href", {{
    enumerable: true,
    get: function () {{ return {href}; }},
    set: function (url) {{ location.assign(url); }}
}});
document.location = location;

function __webdriverInvoke(now, fn, receiver) {{
    __webdriverClock.now = now;
    var args = Array.prototype.slice.call(arguments, 3);
    try {{
        return {{ threw: false, value: fn.apply(receiver, args) }};
    }} catch (e) {{
        var description = null;
        if (e !== null && e !== undefined) {{
            description = (typeof e === "object" && "message" in e) ? String(e.message) : String(e);
        }}
        return {{ threw: true, description: description }};
    }}
}}

function __webdriverKindOf(value) {{
    if (Array.isArray(value)) {{ return "array"; }}
    if (value instanceof NodeList) {{ return "collection"; }}
    if (value instanceof Element) {{ return "element"; }}
    if (value === window) {{ return "window"; }}
    if (value instanceof HTMLDocument) {{ return "document"; }}
    if (typeof value === "function") {{ return "function"; }}
    return "object";
}}

function __webdriverIdentityOf(value) {{
    var identity = __webdriverIdentities.get(value);
    if (identity === undefined) {{
        identity = __webdriverNextIdentity++;
        __webdriverIdentities.set(value, identity);
    }}
    return identity;
}}

function __webdriverPropertyNames(value) {{
    var names = [];
    for (var name in value) {{ names.push(name); }}
    return JSON.stringify(names);
}}

function __webdriverRunTimers(now, limit) {{
    __webdriverClock.now = now;
    var ran = 0;
    while (ran < limit) {{
        var next = null;
        var queue = __webdriverTimers.queue;
        for (var i = 0; i < queue.length; i++) {{
            var timer = queue[i];
            if (timer.due > now) {{ continue; }}
            if (next === null || timer.due < next.due || (timer.due === next.due && timer.id < next.id)) {{
                next = timer;
            }}
        }}
        if (next === null) {{ break; }}
        clearTimeout(next.id);
        try {{
            if (typeof next.fn === "function") {{ next.fn(); }}
        }} catch (e) {{}}
        ran++;
    }}
    return ran;
}}

function __webdriverTakeNavigation() {{
    if (!__webdriverNavigation.pending) {{ return null; }}
    __webdriverNavigation.pending = false;
    return __webdriverNavigation.url === null ? location.href : __webdriverNavigation.url;
}}
"#,
        href = href
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_calls_functions() {
        let mut page = BoaPage::new().unwrap();
        let function = page
            .compile_function("(function() { return function(a, b) { return a + b; }; })();")
            .unwrap();
        let result = page
            .call_function(
                &function,
                &HostValue::Undefined,
                &[HostValue::Integer(2), HostValue::Integer(40)],
            )
            .unwrap();
        assert_eq!(result, HostValue::Integer(42));
    }

    #[test]
    fn syntax_errors_are_compilation_failures() {
        let mut page = BoaPage::new().unwrap();
        let err = page.compile_function("(function() { return ").unwrap_err();
        assert!(matches!(err, HostError::Compilation(_)));

        let err = page.compile_function("42").unwrap_err();
        assert!(matches!(err, HostError::Compilation(_)));
    }

    #[test]
    fn thrown_errors_carry_their_message() {
        let mut page = BoaPage::new().unwrap();
        let function = page
            .compile_function("(function() { throw new Error('boom'); })")
            .unwrap();
        let err = page
            .call_function(&function, &HostValue::Undefined, &[])
            .unwrap_err();
        assert_eq!(
            err,
            HostError::Thrown {
                description: Some("boom".into())
            }
        );
    }

    #[test]
    fn reports_structural_kinds() {
        let mut page = BoaPage::with_setup(
            "var el = document.createElement('div'); el.id = 'x'; document.body.appendChild(el);",
        )
        .unwrap();

        let kind_of = |page: &mut BoaPage, script: &str| {
            let value = page.evaluate(script).unwrap();
            let object = value.as_object().cloned().unwrap();
            page.object_kind(&object).unwrap()
        };

        assert_eq!(kind_of(&mut page, "[1, 2]"), ObjectKind::Array);
        assert_eq!(kind_of(&mut page, "({ a: 1 })"), ObjectKind::ScriptObject);
        assert_eq!(
            kind_of(&mut page, "document.getElementById('x')"),
            ObjectKind::Element
        );
        assert_eq!(
            kind_of(&mut page, "document.getElementsByTagName('div')"),
            ObjectKind::ElementCollection
        );
        assert_eq!(
            kind_of(&mut page, "window"),
            ObjectKind::Dispatchable("window".into())
        );
    }

    #[test]
    fn property_names_include_inherited_and_awkward_names() {
        let mut page = BoaPage::new().unwrap();
        let value = page
            .evaluate("var base = { inherited: 1 }; var o = Object.create(base); o['a,b'] = 2; o;")
            .unwrap();
        let object = value.as_object().cloned().unwrap();
        let names = page.property_names(&object).unwrap();
        assert_eq!(names, vec!["a,b".to_string(), "inherited".to_string()]);
    }

    #[test]
    fn identity_is_stable_per_object() {
        let mut page = BoaPage::new().unwrap();
        let first = page.evaluate("var shared = {}; shared;").unwrap();
        let again = page.evaluate("shared").unwrap();
        let other = page.evaluate("({})").unwrap();

        let first = page.object_identity(first.as_object().unwrap()).unwrap();
        let again = page.object_identity(again.as_object().unwrap()).unwrap();
        let other = page.object_identity(other.as_object().unwrap()).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn reload_request_replaces_document() {
        let mut page = BoaPage::new().unwrap();
        let before = page.document_id();
        page.evaluate("var marker = 1; location.reload();").unwrap();
        assert_eq!(page.document_id(), before);

        page.yield_to_page();
        assert_ne!(page.document_id(), before);
        assert_eq!(page.evaluate("typeof marker").unwrap(), HostValue::String("undefined".into()));
    }

    #[test]
    fn zero_delay_timers_run_on_yield() {
        let mut page = BoaPage::new().unwrap();
        page.evaluate("var fired = []; setTimeout(function () { fired.push('a'); setTimeout(function () { fired.push('c'); }, 0); }, 0); setTimeout(function () { fired.push('b'); }, 0);")
            .unwrap();
        page.yield_to_page();
        assert_eq!(
            page.evaluate("fired.join('')").unwrap(),
            HostValue::String("abc".into())
        );
    }

    #[test]
    fn relative_navigation_resolves_against_current_url() {
        let mut page = BoaPage::new().unwrap();
        page.navigate("https://example.test/a/index.html").unwrap();
        page.evaluate("location.assign('next.html');").unwrap();
        page.yield_to_page();
        assert_eq!(page.url(), "https://example.test/a/next.html");
        assert_eq!(
            page.evaluate("location.href").unwrap(),
            HostValue::String("https://example.test/a/next.html".into())
        );

        assert!(page.navigate("http://[broken").is_err());
    }

    #[test]
    fn unsupported_values_cannot_be_passed_in() {
        let mut page = BoaPage::new().unwrap();
        let function = page
            .compile_function("(function() { return function(a) { return typeof a; }; })();")
            .unwrap();
        let err = page
            .call_function(
                &function,
                &HostValue::Undefined,
                &[HostValue::Unsupported("symbol".into())],
            )
            .unwrap_err();
        assert!(matches!(err, HostError::Binding(_)));
    }

    #[test]
    fn objects_compare_by_identity() {
        let mut page = BoaPage::new().unwrap();
        let first = page.evaluate("var shared = {}; shared;").unwrap();
        let again = page.evaluate("shared").unwrap();
        let twin = page.evaluate("({})").unwrap();
        assert_eq!(first, again);
        assert_ne!(first, twin);
    }

    #[test]
    fn numbers_split_into_integers_and_doubles() {
        assert_eq!(number_value(3.0), HostValue::Integer(3));
        assert_eq!(number_value(3.5), HostValue::Double(3.5));
        assert!(matches!(number_value(f64::NAN), HostValue::Double(_)));
        assert!(matches!(number_value(-0.0), HostValue::Double(_)));
    }
}
