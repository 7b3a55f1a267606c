//! Shared fixtures for bridge integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::fmt;
use std::mem::offset_of;
use std::sync::Arc;

use tether_engine::{
    Bridge, Bridged, EngineAddr, HeadlessLoop, HeadlessRuntime, Kind, ObjectRef, Painter, TypeShape,
    Value,
};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG` selects what is shown.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runtime, bridge and one engine, created on the calling (main) thread.
pub fn setup() -> (Arc<HeadlessRuntime>, Arc<Bridge>, EngineAddr) {
    init_tracing();
    let runtime = HeadlessRuntime::new();
    let bridge = Bridge::new(runtime.clone(), HeadlessLoop::new());
    let engine = bridge.new_engine();
    (runtime, bridge, engine)
}

thread_local! {
    /// Bridge reachable from fixture methods running on this thread.
    pub static CURRENT: RefCell<Option<Arc<Bridge>>> = const { RefCell::new(None) };
}

pub fn set_current(bridge: &Arc<Bridge>) {
    CURRENT.with(|c| *c.borrow_mut() = Some(bridge.clone()));
}

fn with_current(f: impl FnOnce(&Bridge)) {
    CURRENT.with(|c| {
        if let Some(bridge) = c.borrow().as_ref() {
            f(bridge);
        }
    });
}

// ============================================================================
// Counter: field plus matching setter
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct Counter {
    pub count: i32,
    pub sets: u32,
}

impl Bridged for Counter {
    fn shape() -> TypeShape {
        TypeShape::builder::<Counter>("Counter")
            .field("Count", offset_of!(Counter, count), |c| &c.count, |c| &mut c.count)
            .hidden("sets", offset_of!(Counter, sets), std::mem::size_of::<u32>())
            .method1("SetCount", |c: &mut Counter, n: i32| {
                c.count = n;
                c.sets += 1;
            })
            .method0("Increment", |c: &mut Counter| {
                c.count += 1;
                c.count
            })
            .build()
    }
}

// ============================================================================
// Greeter: plain method
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct Greeter;

impl Bridged for Greeter {
    fn shape() -> TypeShape {
        TypeShape::builder::<Greeter>("Greeter")
            .method1("Greet", |_g: &mut Greeter, name: String| format!("Hello, {}", name))
            .method1("Split", |_g: &mut Greeter, s: String| {
                let (head, tail) = s.split_at(s.len() / 2);
                (head.to_string(), tail.to_string())
            })
            .method2("Add", |_g: &mut Greeter, a: i64, b: i64| a + b)
            .build()
    }
}

// ============================================================================
// Labeled: getter/setter property
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct Labeled {
    label: String,
}

impl Bridged for Labeled {
    fn shape() -> TypeShape {
        TypeShape::builder::<Labeled>("Labeled")
            .hidden("label", offset_of!(Labeled, label), std::mem::size_of::<String>())
            .getter("Label", |l: &Labeled| l.label.clone())
            .method1("SetLabel", |l: &mut Labeled, s: String| l.label = s.to_uppercase())
            .build()
    }
}

// ============================================================================
// Derived: promoted fields
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Base {
    pub id: i32,
    pub url: String,
}

impl Bridged for Base {
    fn shape() -> TypeShape {
        TypeShape::builder::<Base>("Base")
            .field("ID", offset_of!(Base, id), |b| &b.id, |b| &mut b.id)
            .field("URL", offset_of!(Base, url), |b| &b.url, |b| &mut b.url)
            .build()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Derived {
    pub base: Base,
    pub name: String,
    pub url: String,
}

impl Bridged for Derived {
    fn shape() -> TypeShape {
        TypeShape::builder::<Derived>("Derived")
            .embed("Base", offset_of!(Derived, base), |d| &d.base, |d| &mut d.base)
            .field("Name", offset_of!(Derived, name), |d| &d.name, |d| &mut d.name)
            // Shadows Base.URL.
            .field("URL", offset_of!(Derived, url), |d| &d.url, |d| &mut d.url)
            .build()
    }
}

/// Struct with a nested (non-embedded) struct field.
#[derive(Debug, Default, Clone)]
pub struct Holder {
    pub inner: Base,
}

impl Bridged for Holder {
    fn shape() -> TypeShape {
        TypeShape::builder::<Holder>("Holder")
            .nested("Inner", offset_of!(Holder, inner), |h| &h.inner, |h| &mut h.inner)
            .build()
    }
}

// ============================================================================
// Temperature: named primitive
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct Temperature(pub f64);

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}C", self.0)
    }
}

impl Bridged for Temperature {
    fn shape() -> TypeShape {
        TypeShape::builder::<Temperature>("Temperature")
            .kind(Kind::Float64)
            .underlying(|t: &Temperature| t.0)
            .display()
            .build()
    }
}

/// Named integer with methods: wrapped, with a synthesized `valueOf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Level(pub i32);

impl Bridged for Level {
    fn shape() -> TypeShape {
        TypeShape::builder::<Level>("Level")
            .kind(Kind::Int32)
            .underlying(|l: &Level| l.0)
            .method0("Raise", |l: &mut Level| l.0 += 1)
            .build()
    }
}

// ============================================================================
// Point: comparable by-value struct
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Bridged for Point {
    fn shape() -> TypeShape {
        TypeShape::builder::<Point>("Point")
            .field("X", offset_of!(Point, x), |p| &p.x, |p| &mut p.x)
            .field("Y", offset_of!(Point, y), |p| &p.y, |p| &mut p.y)
            .stringer(|p: &Point| format!("({}, {})", p.x, p.y))
            .comparable()
            .build()
    }
}

/// Struct that cannot be identified by content.
#[derive(Debug, Default, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
}

impl Bridged for Blob {
    fn shape() -> TypeShape {
        TypeShape::builder::<Blob>("Blob").build()
    }
}

/// Marshals itself as a plain string.
#[derive(Debug, Default, Clone)]
pub struct Token {
    pub secret: String,
}

impl Bridged for Token {
    fn shape() -> TypeShape {
        TypeShape::builder::<Token>("Token")
            .marshal(|t: &Token| Value::Str(format!("token:{}", t.secret.len())))
            .build()
    }
}

// ============================================================================
// Painting
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct Canvas {
    pub frames: u32,
    pub last: Option<Painter>,
}

impl Bridged for Canvas {
    fn shape() -> TypeShape {
        TypeShape::builder::<Canvas>("Canvas")
            .paint(|c: &mut Canvas, painter: Painter| {
                c.frames += 1;
                c.last = Some(painter);
            })
            .build()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Faulty;

impl Bridged for Faulty {
    fn shape() -> TypeShape {
        TypeShape::builder::<Faulty>("Faulty")
            .paint(|_f: &mut Faulty, _painter: Painter| panic!("brush exploded"))
            .build()
    }
}

/// Registered type with an initializer and a paint method.
#[derive(Debug, Default, Clone)]
pub struct Widget {
    pub object: Option<ObjectRef>,
    pub frames: u32,
}

impl Bridged for Widget {
    fn shape() -> TypeShape {
        TypeShape::builder::<Widget>("Widget")
            .paint(|w: &mut Widget, _painter: Painter| w.frames += 1)
            .build()
    }
}

pub fn init_widget(widget: &mut Widget, object: ObjectRef) {
    widget.object = Some(object);
}

// ============================================================================
// List properties
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct Gallery {
    pub items: Vec<ObjectRef>,
}

impl Bridged for Gallery {
    fn shape() -> TypeShape {
        TypeShape::builder::<Gallery>("Gallery")
            .object_list("Items", offset_of!(Gallery, items), |g| &g.items, |g| &mut g.items)
            .build()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Playlist {
    pub items: Vec<ObjectRef>,
    pub updates: u32,
}

impl Bridged for Playlist {
    fn shape() -> TypeShape {
        TypeShape::builder::<Playlist>("Playlist")
            .object_list("Items", offset_of!(Playlist, items), |p| &p.items, |p| &mut p.items)
            .method1("SetItems", |p: &mut Playlist, items: Vec<ObjectRef>| {
                p.items = items;
                p.updates += 1;
            })
            .build()
    }
}

// ============================================================================
// Change notification
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct Thermostat {
    pub mode: u8,
    pub target: i32,
}

impl Bridged for Thermostat {
    fn shape() -> TypeShape {
        TypeShape::builder::<Thermostat>("Thermostat")
            .field("Mode", offset_of!(Thermostat, mode), |t| &t.mode, |t| &mut t.mode)
            .field("Target", offset_of!(Thermostat, target), |t| &t.target, |t| &mut t.target)
            .method0("Bump", |t: &mut Thermostat| {
                t.target += 1;
                with_current(|bridge| bridge.changed(&*t, &t.target));
            })
            .build()
    }
}
