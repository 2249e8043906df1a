use crate::gallery::GalleryItem;
use crate::gesture::SwipeTracker;
use crate::lightbox::Lightbox;
use crate::FullImageMessage;
use crossbeam_channel::{Receiver as CbReceiver, Sender as CbSender};
use nannou::image::DynamicImage;
use nannou::prelude::{Key, Rect, Vec2, WindowId};
use nannou::wgpu;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;
use toml::Value as TomlValue;

/// A user key chord bound to a shell command, read from `bindings.toml`.
#[derive(Debug, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: Key,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub super_key: bool,
    pub command: String,
}

/// Deduplicating work queue feeding the thumbnail worker threads.
///
/// Workers block in [`pop`] until an index arrives or the queue is closed;
/// closing wakes every worker so the threads can exit.
///
/// [`pop`]: ThumbRequestQueue::pop
#[derive(Clone, Debug)]
pub struct ThumbRequestQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    queue: Mutex<Queue>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<usize>,
    queued: HashSet<usize>,
    closed: bool,
}

impl ThumbRequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(Queue::default()),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn enqueue(&self, index: usize) {
        self.enqueue_batch(std::iter::once(index));
    }

    pub fn enqueue_batch<I>(&self, indices: I)
    where
        I: IntoIterator<Item = usize>,
    {
        let mut queue = self.inner.queue.lock().unwrap();
        if queue.closed {
            return;
        }
        let mut woke_work = false;
        for index in indices {
            if queue.queued.insert(index) {
                queue.pending.push_back(index);
                woke_work = true;
            }
        }
        if woke_work {
            self.inner.ready.notify_all();
        }
    }

    /// Next index to work on; blocks while the queue is open and empty.
    /// `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<usize> {
        let mut queue = self.inner.queue.lock().unwrap();
        loop {
            if let Some(index) = queue.pending.pop_front() {
                queue.queued.remove(&index);
                return Some(index);
            }
            if queue.closed {
                return None;
            }
            queue = self.inner.ready.wait(queue).unwrap();
        }
    }

    /// Reorder pending work so smaller `priority` values pop first.
    pub fn reprioritize<F>(&self, mut priority: F)
    where
        F: FnMut(usize) -> f32,
    {
        let mut queue = self.inner.queue.lock().unwrap();
        if queue.pending.len() <= 1 {
            return;
        }
        let mut scored: Vec<(usize, f32)> = queue
            .pending
            .iter()
            .map(|&index| (index, priority(index)))
            .collect();
        scored.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        queue.pending.clear();
        queue.pending.extend(scored.into_iter().map(|(index, _)| index));
    }

    pub fn close(&self) {
        let mut queue = self.inner.queue.lock().unwrap();
        queue.closed = true;
        self.inner.ready.notify_all();
    }
}

impl Default for ThumbRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn key_from_token(token: &str) -> Option<Key> {
    let mut chars = token.chars();
    let ch = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let key = match ch.to_ascii_uppercase() {
        'A' => Key::A,
        'B' => Key::B,
        'C' => Key::C,
        'D' => Key::D,
        'E' => Key::E,
        'F' => Key::F,
        'G' => Key::G,
        'H' => Key::H,
        'I' => Key::I,
        'J' => Key::J,
        'K' => Key::K,
        'L' => Key::L,
        'M' => Key::M,
        'N' => Key::N,
        'O' => Key::O,
        'P' => Key::P,
        'Q' => Key::Q,
        'R' => Key::R,
        'S' => Key::S,
        'T' => Key::T,
        'U' => Key::U,
        'V' => Key::V,
        'W' => Key::W,
        'X' => Key::X,
        'Y' => Key::Y,
        'Z' => Key::Z,
        '0' => Key::Key0,
        '1' => Key::Key1,
        '2' => Key::Key2,
        '3' => Key::Key3,
        '4' => Key::Key4,
        '5' => Key::Key5,
        '6' => Key::Key6,
        '7' => Key::Key7,
        '8' => Key::Key8,
        '9' => Key::Key9,
        _ => return None,
    };
    Some(key)
}

fn parse_binding_spec(spec: &str, command: &str) -> Option<KeyBinding> {
    let mut binding = KeyBinding {
        key: Key::A,
        ctrl: false,
        shift: false,
        alt: false,
        super_key: false,
        command: command.to_string(),
    };
    let mut key_seen = false;
    for part in spec.split('+').map(str::trim) {
        match part.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => binding.ctrl = true,
            "shift" => binding.shift = true,
            "alt" => binding.alt = true,
            "super" | "cmd" | "meta" => binding.super_key = true,
            token => {
                if key_seen {
                    return None;
                }
                binding.key = key_from_token(token)?;
                key_seen = true;
            }
        }
    }
    key_seen.then_some(binding)
}

/// Parse a `bindings.toml` body: a table of `"chord" = "command"` pairs.
/// Malformed entries are skipped.
pub fn parse_bindings(contents: &str) -> Vec<KeyBinding> {
    let mut bindings = Vec::new();
    if let Ok(TomlValue::Table(table)) = toml::from_str::<TomlValue>(contents) {
        for (spec, value) in table {
            if let TomlValue::String(command) = value {
                if let Some(binding) = parse_binding_spec(&spec, &command) {
                    bindings.push(binding);
                }
            }
        }
    }
    bindings
}

/// Load status of a full-resolution image that is not yet cached.
#[derive(Debug)]
pub enum LoadStatus {
    InFlight,
    Failed { at: Instant },
}

/// One GPU-uploadable slice of a full-resolution image. The texture slot is
/// filled lazily on first draw.
#[derive(Debug)]
pub struct Tile {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_data: Vec<u8>,
    pub texture: RefCell<Option<wgpu::Texture>>,
}

/// A full-resolution image as a set of tiles no larger than the GPU's
/// texture limit.
#[derive(Debug)]
pub struct TiledTexture {
    pub full_w: u32,
    pub full_h: u32,
    pub tiles: Vec<Tile>,
}

impl TiledTexture {
    pub fn size(&self) -> [u32; 2] {
        [self.full_w, self.full_h]
    }
}

/// A decoded thumbnail arriving from a worker thread.
#[derive(Debug)]
pub struct ThumbnailUpdate {
    pub index: usize,
    pub image: DynamicImage,
}

/// A thumbnail currently on screen, with its uploaded texture.
#[derive(Debug)]
pub struct ThumbnailTexture {
    pub texture: wgpu::Texture,
    pub center: Vec2,
    pub size: [u32; 2],
}

#[derive(Debug)]
pub struct Model {
    pub items: Vec<GalleryItem>,
    /// The navigation state machine; the single writer of the viewing index.
    pub lightbox: Lightbox,
    pub swipe: SwipeTracker,
    /// Grid selection. Synced to the viewed item when the lightbox closes.
    pub selected: usize,
    pub thumb_visible: HashMap<usize, ThumbnailTexture>,
    pub thumb_data: HashMap<usize, DynamicImage>,
    pub thumb_rx: Receiver<ThumbnailUpdate>,
    pub thumb_queue: ThumbRequestQueue,
    pub full_req_tx: CbSender<usize>,
    pub full_resp_rx: CbReceiver<FullImageMessage>,
    pub full_pending: HashMap<usize, LoadStatus>,
    pub full_textures: HashMap<usize, TiledTexture>,
    pub full_usage: VecDeque<usize>,
    pub thumb_size: u32,
    pub gap: f32,
    pub scroll_offset: f32,
    pub zoom: f32,
    pub pan: Vec2,
    pub fit_mode: bool,
    pub user_zoomed: bool,
    pub prev_window_rect: Rect,
    pub prev_scroll: f32,
    pub numeric_prefix: Option<usize>,
    pub selection_changed_at: Instant,
    pub selection_preloaded: bool,
    pub key_bindings: Vec<KeyBinding>,
    pub command_tx: Sender<String>,
    pub command_rx: Receiver<String>,
    pub command_output: Option<String>,
    pub window_id: WindowId,
}

impl Drop for Model {
    fn drop(&mut self) {
        // wakes and ends the thumbnail workers; the full-image loaders end
        // when full_req_tx hangs up
        self.thumb_queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo_and_deduplicates() {
        let queue = ThumbRequestQueue::new();
        queue.enqueue(3);
        queue.enqueue_batch([1, 3, 2]);
        queue.enqueue(1);
        queue.close();
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn close_drains_then_ends() {
        let queue = ThumbRequestQueue::new();
        queue.enqueue(7);
        queue.close();
        // pending work is still handed out after close
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), None);
        // and nothing can be enqueued any more
        queue.enqueue(8);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn close_wakes_blocked_workers() {
        let queue = ThumbRequestQueue::new();
        let worker = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        queue.close();
        assert_eq!(worker.join().unwrap(), None);
    }

    #[test]
    fn reprioritize_orders_by_score() {
        let queue = ThumbRequestQueue::new();
        queue.enqueue_batch([0, 1, 2, 3]);
        queue.reprioritize(|index| match index {
            2 => 0.0,
            3 => 1.0,
            _ => 10.0 + index as f32,
        });
        queue.close();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
    }

    #[test]
    fn bindings_parse_chords() {
        let bindings = parse_bindings(
            "\"d\" = \"cp {file} ~/saved/\"\n\"ctrl+shift+e\" = \"gimp {file}\"\n",
        );
        assert_eq!(bindings.len(), 2);

        let plain = bindings.iter().find(|b| b.key == Key::D).unwrap();
        assert!(!plain.ctrl && !plain.shift && !plain.alt && !plain.super_key);
        assert_eq!(plain.command, "cp {file} ~/saved/");

        let chord = bindings.iter().find(|b| b.key == Key::E).unwrap();
        assert!(chord.ctrl && chord.shift);
    }

    #[test]
    fn bindings_accept_digits_and_modifier_aliases() {
        let bindings = parse_bindings("\"super+1\" = \"echo one\"\n");
        assert_eq!(
            bindings,
            vec![KeyBinding {
                key: Key::Key1,
                ctrl: false,
                shift: false,
                alt: false,
                super_key: true,
                command: "echo one".to_string(),
            }]
        );
    }

    #[test]
    fn malformed_bindings_are_skipped() {
        // two keys, unknown key name, no key at all, non-string command
        let bindings = parse_bindings(
            "\"a+b\" = \"x\"\n\"f13\" = \"x\"\n\"ctrl\" = \"x\"\n\"c\" = 3\n",
        );
        assert!(bindings.is_empty());
    }
}
