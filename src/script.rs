//! Selection scripts: a list of strips plus a sequence of selection operations.
//!
//! Used by the command line tool to drive a `CoreSelection` and a
//! `SelectionViewAdapter` the way a session and its mixer window would.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::core::event_bus::downcast_event;
use crate::core::selection::CoreSelection;
use crate::core::selection_events::SelectionChangedEvent;
use crate::entities::{ControllableRef, Strip, Stripable, StripableRef};
use crate::widgets::{AxisViewRef, MixerStrip, SelectionViewAdapter, ViewRegistry};

/// Session used when no script is given
pub const DEMO_SCRIPT: &str = r#"{
  "strips": [
    { "name": "Kick", "controls": ["gain", "pan"] },
    { "name": "Snare", "controls": ["gain", "pan"] },
    { "name": "Bass", "controls": ["gain", "drive"] },
    { "name": "Vox", "controls": ["gain", "reverb.send"] }
  ],
  "ops": [
    { "op": "add", "strip": "Kick", "view": true },
    { "op": "add", "strip": "Snare" },
    { "op": "add", "strip": "Bass", "control": "drive" },
    { "op": "toggle", "strip": "Snare" },
    { "op": "add", "strip": "Vox", "control": "reverb.send", "control_only": true },
    { "op": "add", "strip": "Vox" },
    { "op": "drop", "strip": "Kick" },
    { "op": "prune" }
  ]
}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripDef {
    pub name: String,
    #[serde(default)]
    pub controls: Vec<String>,
}

/// What an operation selects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub strip: Option<String>,
    pub control: Option<String>,
    /// Look the control up on `strip` but select it without the strip
    pub control_only: bool,
    /// Go through the strip's mixer view instead of the core selection
    pub view: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Add(Target),
    Remove(Target),
    Toggle(Target),
    Set(Target),
    Clear,
    /// Destroy a strip and its view
    Drop { strip: String },
    Prune,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub strips: Vec<StripDef>,
    pub ops: Vec<Op>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid script: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One selected item in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub order: u64,
    pub strip: Option<String>,
    pub control: Option<String>,
}

/// Final state after running a script
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub selection: Vec<ReportEntry>,
    pub highlighted_views: Vec<String>,
    pub notifications: usize,
}

impl Report {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.selection {
            let strip = entry.strip.as_deref().unwrap_or("-");
            match &entry.control {
                Some(control) => out.push_str(&format!("{:>4}  {}/{}\n", entry.order, strip, control)),
                None => out.push_str(&format!("{:>4}  {}\n", entry.order, strip)),
            }
        }
        out.push_str(&format!("views: [{}]\n", self.highlighted_views.join(", ")));
        out.push_str(&format!("notifications: {}\n", self.notifications));
        out
    }
}

/// Strips owned by the running script, with one mixer view each.
pub struct Session {
    strips: IndexMap<String, (Arc<Strip>, AxisViewRef)>,
    registry: Arc<ViewRegistry>,
}

impl Session {
    pub fn new(defs: &[StripDef]) -> Self {
        let registry = Arc::new(ViewRegistry::new());
        let strips = defs
            .iter()
            .map(|def| {
                let strip = Strip::with_controls(def.name.clone(), def.controls.iter().cloned());
                let view: AxisViewRef = MixerStrip::new(strip.clone());
                registry.register(&view);
                (def.name.clone(), (strip, view))
            })
            .collect();
        Self { strips, registry }
    }

    pub fn registry(&self) -> Arc<ViewRegistry> {
        Arc::clone(&self.registry)
    }

    fn strip(&self, name: &str) -> Result<&(Arc<Strip>, AxisViewRef)> {
        self.strips.get(name).with_context(|| format!("Unknown strip '{}'", name))
    }

    fn resolve(&self, target: &Target) -> Result<(Option<StripableRef>, Option<ControllableRef>)> {
        let strip = match &target.strip {
            Some(name) => Some(&self.strip(name)?.0),
            None => None,
        };
        let control = match (&target.control, strip) {
            (Some(name), Some(strip)) => Some(
                strip
                    .control(name)
                    .with_context(|| format!("Strip '{}' has no control '{}'", strip.name(), name))?,
            ),
            (Some(name), None) => bail!("Control '{}' needs a strip to look it up on", name),
            (None, _) => None,
        };
        let stripable = if target.control_only {
            None
        } else {
            strip.map(|s| s.clone() as StripableRef)
        };
        Ok((stripable, control))
    }

    fn view(&self, target: &Target) -> Result<&AxisViewRef> {
        if target.control.is_some() || target.control_only {
            bail!("View operations select whole strips only");
        }
        match &target.strip {
            Some(name) => Ok(&self.strip(name)?.1),
            None => bail!("View operations need a strip"),
        }
    }

    /// Remove a strip from the session. Its view is destroyed with it.
    fn drop_strip(&mut self, name: &str) -> Result<()> {
        let (strip, view) = self
            .strips
            .shift_remove(name)
            .with_context(|| format!("Unknown strip '{}'", name))?;
        drop(view);
        drop(strip);
        Ok(())
    }
}

/// Run every operation of `script` and report the final selection.
pub fn run(script: &Script, core: Arc<CoreSelection>, prune_after_ops: bool) -> Result<Report> {
    let mut session = Session::new(&script.strips);
    let adapter = SelectionViewAdapter::new(Arc::clone(&core), session.registry());

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let subscription = core.subscribe(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    for (step, op) in script.ops.iter().enumerate() {
        debug!("step {}: {:?}", step, op);
        apply(op, &mut session, &core, &adapter).with_context(|| format!("Script step {} failed", step))?;
        if prune_after_ops {
            core.prune();
        }
        // Drain the deferred queue the way a UI loop would each frame
        for event in core.events().poll() {
            if let Some(changed) = downcast_event::<SelectionChangedEvent>(&event) {
                trace!("deferred change {:?}", changed.what);
            }
        }
    }

    core.unsubscribe(subscription);

    let selection = core
        .get_stripables()
        .into_iter()
        .map(|sc| ReportEntry {
            order: sc.order,
            strip: sc.stripable.map(|s| s.name().to_string()),
            control: sc.controllable.map(|c| c.name().to_string()),
        })
        .collect();

    let highlighted_views = session
        .strips
        .iter()
        .filter(|(_, (_, view))| adapter.selected(view.as_ref()))
        .map(|(name, _)| name.clone())
        .collect();

    let report = Report {
        selection,
        highlighted_views,
        notifications: notifications.load(Ordering::Relaxed),
    };
    info!(
        "script done: {} selected, {} notifications",
        report.selection.len(),
        report.notifications
    );
    Ok(report)
}

fn apply(op: &Op, session: &mut Session, core: &CoreSelection, adapter: &SelectionViewAdapter) -> Result<()> {
    match op {
        Op::Add(t) if t.view => adapter.add(session.view(t)?),
        Op::Remove(t) if t.view => adapter.remove(session.view(t)?.as_ref()),
        Op::Set(t) if t.view => adapter.set(session.view(t)?),
        Op::Toggle(t) if t.view => bail!("toggle has no view form"),
        Op::Add(t) => {
            let (s, c) = session.resolve(t)?;
            core.add(s.as_ref(), c.as_ref());
        }
        Op::Remove(t) => {
            let (s, c) = session.resolve(t)?;
            core.remove(s.as_ref(), c.as_ref());
        }
        Op::Toggle(t) => {
            let (s, c) = session.resolve(t)?;
            core.toggle(s.as_ref(), c.as_ref());
        }
        Op::Set(t) => {
            let (s, c) = session.resolve(t)?;
            core.set(s.as_ref(), c.as_ref());
        }
        Op::Clear => adapter.clear(),
        Op::Drop { strip } => session.drop_strip(strip)?,
        Op::Prune => {
            let removed = core.prune();
            debug!("pruned {} entries", removed);
        }
    }
    Ok(())
}
