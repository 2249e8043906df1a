use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver as CbReceiver, Sender as CbSender};
use image::imageops::crop_imm;
use image::{DynamicImage, GenericImageView, RgbaImage};
use nannou::event::{ModifiersState, MouseButton, MouseScrollDelta, TouchEvent, TouchPhase, Update};
use nannou::prelude::*;
use nannou::wgpu;
use sha1::Sha1;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod gallery;
mod gesture;
mod grid;
mod lightbox;
mod state;

use gesture::Swipe;
use grid::GalleryGrid;
use lightbox::Lightbox;
use state::{
    parse_bindings, LoadStatus, Model, ThumbRequestQueue, ThumbnailTexture, ThumbnailUpdate, Tile,
    TiledTexture,
};

type FullImageTile = (u32, u32, u32, u32, Vec<u8>);

#[derive(Debug)]
pub enum FullImageMessage {
    Loaded {
        index: usize,
        full_w: u32,
        full_h: u32,
        tiles: Vec<FullImageTile>,
    },
    Failed {
        index: usize,
        error: String,
    },
}

/// Full-resolution images kept in memory.
const FULL_CACHE_CAPACITY: usize = 4;
/// Back-off before retrying a failed full-resolution load.
const FULL_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Resting time on a grid selection before its full image is preloaded.
const SELECTION_PRELOAD_DELAY: Duration = Duration::from_millis(200);
/// Largest texture tile uploaded to the GPU.
const MAX_TILE_SIZE: u32 = 8192;
/// Pixel size thumbnails are generated and cached at; cells display them
/// scaled down.
const THUMB_GEN_SIZE: u32 = 512;
const DEFAULT_THUMB_SIZE: u32 = 160;
const MIN_THUMB_SIZE: u32 = 64;
const MAX_THUMB_SIZE: u32 = 480;
const THUMB_SIZE_STEP: u32 = 32;
/// Edge strip width of the previous/next affordances in the lightbox.
const NAV_STRIP_WIDTH: f32 = 80.0;
/// Hit zone of the close affordance in the top-right corner.
const CLOSE_ZONE: f32 = 56.0;
/// Height of the lightbox caption bar.
const CAPTION_BAR_H: f32 = 56.0;
const INFO_BAR_H: f32 = 25.0;

fn main() -> Result<()> {
    nannou::app(model).update(update).run();
    Ok(())
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(fallback)))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Cache path for an image, keyed by a SHA-1 of its canonical path.
/// Layout: `cache_base/<first 3 hex chars>/<remaining 37>.png`.
fn thumbnail_cache_path(cache_base: &Path, image_path: &Path) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(image_path.to_string_lossy().as_bytes());
    let hex = hasher.digest().to_string();
    let (first, rest) = hex.split_at(3);
    cache_base.join(first).join(format!("{rest}.png"))
}

fn integer_ratio(numerator: i64, denominator: i64) -> Option<u16> {
    if denominator == 0 || numerator % denominator != 0 {
        return None;
    }
    u16::try_from(numerator / denominator).ok()
}

fn exif_orientation(value: &rexif::TagValue) -> Option<u16> {
    let raw = match value {
        rexif::TagValue::U16(vals) => vals.first().copied(),
        rexif::TagValue::I16(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::U8(vals) => vals.first().map(|&v| v as u16),
        rexif::TagValue::I8(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::U32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::I32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::URational(vals) => vals
            .first()
            .and_then(|r| integer_ratio(r.numerator as i64, r.denominator as i64)),
        rexif::TagValue::IRational(vals) => vals
            .first()
            .and_then(|r| integer_ratio(r.numerator as i64, r.denominator as i64)),
        _ => None,
    }?;
    (1..=8).contains(&raw).then_some(raw)
}

fn parse_exif_quiet(path: &Path) -> Option<rexif::ExifData> {
    let data = fs::read(path).ok()?;
    rexif::parse_buffer_quiet(&data).0.ok()
}

/// Rotate/flip a decoded image according to its EXIF orientation tag.
fn apply_orientation(img: DynamicImage, path: &Path) -> DynamicImage {
    let mut oriented = img;
    if let Some(exif) = parse_exif_quiet(path) {
        for entry in exif.entries {
            if entry.tag == rexif::ExifTag::Orientation {
                if let Some(code) = exif_orientation(&entry.value) {
                    oriented = match code {
                        2 => oriented.fliph(),
                        3 => oriented.rotate180(),
                        4 => oriented.flipv(),
                        5 => oriented.rotate90().fliph(),
                        6 => oriented.rotate90(),
                        7 => oriented.rotate270().fliph(),
                        8 => oriented.rotate270(),
                        _ => oriented,
                    };
                }
                break;
            }
        }
    }
    oriented
}

fn placeholder_thumbnail() -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, image::Rgba([64, 64, 64, 255])))
}

fn fresh_cached_thumbnail(path: &Path, cache_path: &Path) -> Option<DynamicImage> {
    let source = fs::metadata(path).and_then(|meta| meta.modified()).ok()?;
    let cached = fs::metadata(cache_path).and_then(|meta| meta.modified()).ok()?;
    if cached < source {
        return None;
    }
    let img = image::open(cache_path).ok()?;
    Some(DynamicImage::ImageRgba8(img.to_rgba8()))
}

fn load_thumbnail(path: &Path, cache_base: &Path) -> DynamicImage {
    let cache_path = thumbnail_cache_path(cache_base, path);
    if let Some(cached) = fresh_cached_thumbnail(path, &cache_path) {
        return cached;
    }
    match image::open(path) {
        Ok(img) => {
            let img = apply_orientation(img, path);
            let thumb = img.thumbnail(THUMB_GEN_SIZE, THUMB_GEN_SIZE);
            let (w, h) = thumb.dimensions();
            if w == 0 || h == 0 {
                return placeholder_thumbnail();
            }
            let thumb = DynamicImage::ImageRgba8(thumb.to_rgba8());
            if let Some(parent) = cache_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(err) = thumb.save(&cache_path) {
                eprintln!("failed to cache thumbnail for {}: {}", path.display(), err);
            }
            thumb
        }
        Err(err) => {
            eprintln!("failed to decode {}: {}", path.display(), err);
            placeholder_thumbnail()
        }
    }
}

fn spawn_thumbnail_workers(
    paths: &Arc<Vec<PathBuf>>,
    cache_base: &Path,
    tx: &Sender<ThumbnailUpdate>,
    queue: &ThumbRequestQueue,
    count: usize,
) {
    for _ in 0..count {
        let paths = Arc::clone(paths);
        let cache_base = cache_base.to_path_buf();
        let tx = tx.clone();
        let queue = queue.clone();
        thread::spawn(move || {
            while let Some(index) = queue.pop() {
                let Some(path) = paths.get(index) else {
                    continue;
                };
                let image = load_thumbnail(path, &cache_base);
                if tx.send(ThumbnailUpdate { index, image }).is_err() {
                    break;
                }
            }
        });
    }
}

fn load_full_image(index: usize, path: &Path) -> FullImageMessage {
    match image::open(path) {
        Ok(img) => {
            let rgba = apply_orientation(img, path).to_rgba8();
            let (full_w, full_h) = rgba.dimensions();
            let mut tiles = Vec::new();
            for y in (0..full_h).step_by(MAX_TILE_SIZE as usize) {
                for x in (0..full_w).step_by(MAX_TILE_SIZE as usize) {
                    let tile_w = (full_w - x).min(MAX_TILE_SIZE);
                    let tile_h = (full_h - y).min(MAX_TILE_SIZE);
                    let pixels = crop_imm(&rgba, x, y, tile_w, tile_h).to_image().into_raw();
                    tiles.push((x, y, tile_w, tile_h, pixels));
                }
            }
            FullImageMessage::Loaded {
                index,
                full_w,
                full_h,
                tiles,
            }
        }
        Err(err) => FullImageMessage::Failed {
            index,
            error: format!("failed to open {}: {}", path.display(), err),
        },
    }
}

fn spawn_full_loaders(
    paths: &Arc<Vec<PathBuf>>,
    req_rx: &CbReceiver<usize>,
    resp_tx: &CbSender<FullImageMessage>,
    count: usize,
) {
    for _ in 0..count {
        let paths = Arc::clone(paths);
        let req_rx = req_rx.clone();
        let resp_tx = resp_tx.clone();
        thread::spawn(move || {
            while let Ok(index) = req_rx.recv() {
                let message = match paths.get(index) {
                    Some(path) => load_full_image(index, path),
                    None => FullImageMessage::Failed {
                        index,
                        error: "image index out of range".to_string(),
                    },
                };
                if resp_tx.send(message).is_err() {
                    break;
                }
            }
        });
    }
}

fn model(app: &App) -> Model {
    let mut clear_cache = false;
    let mut inputs = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--clear-cache" => clear_cache = true,
            _ => inputs.push(PathBuf::from(arg)),
        }
    }
    if inputs.is_empty() {
        eprintln!("usage: galbox [--clear-cache] <image files or directories>...");
        std::process::exit(1);
    }
    let items = match gallery::discover(&inputs) {
        Ok(items) => items,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };
    if items.is_empty() {
        eprintln!("no images found");
        std::process::exit(1);
    }

    let cache_base = xdg_dir("XDG_CACHE_HOME", ".cache").join("galbox");
    if clear_cache {
        if let Err(err) = fs::remove_dir_all(&cache_base) {
            if err.kind() != std::io::ErrorKind::NotFound {
                eprintln!(
                    "failed to clear thumbnail cache {}: {}",
                    cache_base.display(),
                    err
                );
            }
        }
    }

    let paths: Arc<Vec<PathBuf>> = Arc::new(items.iter().map(|item| item.path.clone()).collect());
    let workers = rayon::current_num_threads().clamp(1, 8);

    let (thumb_tx, thumb_rx) = channel::<ThumbnailUpdate>();
    let thumb_queue = ThumbRequestQueue::new();
    thumb_queue.enqueue_batch(0..items.len());
    spawn_thumbnail_workers(&paths, &cache_base, &thumb_tx, &thumb_queue, workers);

    let window_id = app
        .new_window()
        .size_pixels(1280, 960)
        .title("galbox")
        .view(view)
        .key_pressed(key_pressed)
        .received_character(received_character)
        .mouse_pressed(mouse_pressed)
        .mouse_released(mouse_released)
        .mouse_wheel(mouse_wheel)
        .touch(touch)
        .build()
        .unwrap();

    let (full_req_tx, full_req_rx) = unbounded::<usize>();
    let (full_resp_tx, full_resp_rx) = unbounded::<FullImageMessage>();
    spawn_full_loaders(&paths, &full_req_rx, &full_resp_tx, workers);

    let bindings_path = xdg_dir("XDG_CONFIG_HOME", ".config")
        .join("galbox")
        .join("bindings.toml");
    let key_bindings = fs::read_to_string(&bindings_path)
        .map(|contents| parse_bindings(&contents))
        .unwrap_or_default();

    let initial_rect = app
        .window(window_id)
        .map(|window| window.rect())
        .unwrap_or_else(|| Rect::from_w_h(0.0, 0.0));
    let (command_tx, command_rx) = channel::<String>();
    let len = items.len();
    Model {
        items,
        lightbox: Lightbox::new(len),
        swipe: gesture::SwipeTracker::new(),
        selected: 0,
        thumb_visible: HashMap::new(),
        thumb_data: HashMap::new(),
        thumb_rx,
        thumb_queue,
        full_req_tx,
        full_resp_rx,
        full_pending: HashMap::new(),
        full_textures: HashMap::new(),
        full_usage: VecDeque::new(),
        thumb_size: DEFAULT_THUMB_SIZE,
        gap: 10.0,
        scroll_offset: 0.0,
        zoom: 1.0,
        pan: vec2(0.0, 0.0),
        fit_mode: true,
        user_zoomed: false,
        prev_window_rect: initial_rect,
        prev_scroll: 0.0,
        numeric_prefix: None,
        selection_changed_at: Instant::now(),
        selection_preloaded: false,
        key_bindings,
        command_tx,
        command_rx,
        command_output: None,
        window_id,
    }
}

fn current_window_rect(app: &App, model: &Model) -> Option<Rect> {
    app.window(model.window_id).map(|window| window.rect())
}

fn gallery_grid(rect: Rect, model: &Model) -> GalleryGrid {
    GalleryGrid::new(
        rect.w(),
        rect.h(),
        model.thumb_size as f32,
        model.gap,
        model.scroll_offset,
        model.items.len(),
    )
}

// ---- lightbox transitions -------------------------------------------------

fn open_lightbox(app: &App, model: &mut Model, index: usize) {
    if model.lightbox.open(index) {
        after_navigation(app, model, index);
    }
}

fn jump_lightbox(app: &App, model: &mut Model, index: usize) {
    if model.lightbox.jump_to(index) {
        after_navigation(app, model, index);
    }
}

fn navigate(app: &App, model: &mut Model, forward: bool) {
    let moved = if forward {
        model.lightbox.next()
    } else {
        model.lightbox.previous()
    };
    if let Some(index) = moved {
        after_navigation(app, model, index);
    }
}

/// Render sync after any transition into or within the open state: load the
/// target, fire off preloads for its wraparound neighbors, refit the view.
fn after_navigation(app: &App, model: &mut Model, index: usize) {
    model.selected = index;
    model.user_zoomed = false;
    request_full_texture(model, index);
    if let Some((prev, next)) = model.lightbox.neighbors() {
        request_full_texture(model, prev);
        request_full_texture(model, next);
    }
    apply_fit(app, model);
}

fn close_lightbox(app: &App, model: &mut Model) {
    let Some(index) = model.lightbox.current() else {
        return;
    };
    model.lightbox.close();
    model.swipe.cancel();
    // hand focus back to the originating entry
    model.selected = index;
    model.selection_changed_at = Instant::now();
    model.selection_preloaded = true;
    ensure_thumbnail_visible(app, model, index);
}

fn touch_full_texture(model: &mut Model, index: usize) {
    if !model.full_textures.contains_key(&index) {
        return;
    }
    if let Some(pos) = model.full_usage.iter().position(|&i| i == index) {
        model.full_usage.remove(pos);
    }
    model.full_usage.push_front(index);
}

/// Request a background load of the full-resolution image at `index`.
/// Deduplicates against the cache, in-flight loads, and failures still in
/// their back-off window.
fn request_full_texture(model: &mut Model, index: usize) {
    if model.full_textures.contains_key(&index) {
        touch_full_texture(model, index);
        return;
    }
    let now = Instant::now();
    let stale = match model.full_pending.get(&index) {
        None => true,
        Some(LoadStatus::InFlight) => false,
        Some(LoadStatus::Failed { at }) => now.duration_since(*at) > FULL_RETRY_AFTER,
    };
    if stale {
        model.full_pending.insert(index, LoadStatus::InFlight);
        if let Err(err) = model.full_req_tx.send(index) {
            model
                .full_pending
                .insert(index, LoadStatus::Failed { at: now });
            eprintln!("failed to request image load for index {index}: {err}");
        }
    }
}

// ---- gallery selection ----------------------------------------------------

enum Direction {
    Left,
    Right,
    Up,
    Down,
}

fn set_selection(app: &App, model: &mut Model, index: usize) {
    if model.items.is_empty() {
        return;
    }
    model.selected = index.min(model.items.len() - 1);
    model.selection_changed_at = Instant::now();
    model.selection_preloaded = false;
    ensure_thumbnail_visible(app, model, model.selected);
}

fn move_selection(app: &App, model: &mut Model, dir: Direction) {
    let len = model.items.len();
    if len == 0 {
        return;
    }
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    let grid = gallery_grid(rect, model);
    let cols = grid.cols();
    let current = model.selected.min(len - 1);
    let mut row = current / cols;
    let mut col = current % cols;
    let total_rows = grid.rows();
    let mut changed = false;
    match dir {
        Direction::Up => {
            if row > 0 {
                row -= 1;
                col = col.min(grid.row_length(row).max(1) - 1);
                changed = true;
            }
        }
        Direction::Down => {
            if row + 1 < total_rows {
                row += 1;
                col = col.min(grid.row_length(row).max(1) - 1);
                changed = true;
            }
        }
        Direction::Left => {
            if col > 0 {
                col -= 1;
                changed = true;
            } else if row > 0 {
                row -= 1;
                col = grid.row_length(row).max(1) - 1;
                changed = true;
            }
        }
        Direction::Right => {
            if col + 1 < grid.row_length(row) {
                col += 1;
                changed = true;
            } else if row + 1 < total_rows {
                row += 1;
                col = 0;
                changed = true;
            }
        }
    }
    if changed {
        let index = (row * cols + col).min(len - 1);
        set_selection(app, model, index);
    }
}

fn ensure_thumbnail_visible(app: &App, model: &mut Model, index: usize) {
    if model.lightbox.is_open() {
        return;
    }
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    let grid = gallery_grid(rect, model);
    if let Some(row) = grid.row_for_index(index) {
        let mut scroll = model.scroll_offset;
        if grid.row_top(row) < scroll {
            scroll = grid.row_top(row);
        } else if grid.row_bottom(row) > scroll + rect.h() {
            scroll = grid.row_bottom(row) - rect.h();
        }
        model.scroll_offset = scroll.clamp(0.0, grid.max_scroll());
    }
}

// ---- zoom and pan ---------------------------------------------------------

fn should_fit_image(model: &Model) -> bool {
    model.fit_mode && !model.user_zoomed
}

/// Fit the current image to the window, leaving the caption bar clear.
fn apply_fit(app: &App, model: &mut Model) {
    model.fit_mode = true;
    model.zoom = 1.0;
    model.pan = vec2(0.0, CAPTION_BAR_H / 2.0);
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    let Some(index) = model.lightbox.current() else {
        return;
    };
    if let Some([w, h]) = model.full_textures.get(&index).map(|tex| tex.size()) {
        let avail_h = (rect.h() - CAPTION_BAR_H).max(1.0);
        model.zoom = (rect.w() / w as f32).min(avail_h / h as f32);
    }
}

fn clamp_pan_to_image(model: &mut Model, rect: Rect, tex_w: f32, tex_h: f32) {
    let disp_w = tex_w * model.zoom;
    let disp_h = tex_h * model.zoom;
    if disp_w <= rect.w() {
        model.pan.x = 0.0;
    } else {
        let max_x = (disp_w - rect.w()) / 2.0;
        model.pan.x = model.pan.x.clamp(-max_x, max_x);
    }
    if disp_h <= rect.h() {
        model.pan.y = 0.0;
    } else {
        let max_y = (disp_h - rect.h()) / 2.0;
        model.pan.y = model.pan.y.clamp(-max_y, max_y);
    }
}

fn zoom_step(app: &App, model: &mut Model, factor: f32) {
    let old_zoom = model.zoom;
    let new_zoom = (old_zoom * factor).clamp(0.01, 100.0);
    model.pan *= new_zoom / old_zoom;
    model.zoom = new_zoom;
    model.user_zoomed = true;
    if let Some(rect) = current_window_rect(app, model) {
        if let Some(index) = model.lightbox.current() {
            if let Some([w, h]) = model.full_textures.get(&index).map(|tex| tex.size()) {
                clamp_pan_to_image(model, rect, w as f32, h as f32);
            }
        }
    }
}

fn pan_image(app: &App, model: &mut Model, key: Key) {
    let step = 200.0;
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    let Some(index) = model.lightbox.current() else {
        return;
    };
    let Some([w, h]) = model.full_textures.get(&index).map(|tex| tex.size()) else {
        return;
    };
    match key {
        Key::Left => model.pan.x += step,
        Key::Right => model.pan.x -= step,
        Key::Up => model.pan.y -= step,
        Key::Down => model.pan.y += step,
        _ => return,
    }
    clamp_pan_to_image(model, rect, w as f32, h as f32);
}

// ---- input handlers -------------------------------------------------------

fn key_pressed(app: &App, model: &mut Model, key: Key) {
    let len = model.items.len();
    let mods = app.keys.mods;
    let plain = mods == ModifiersState::empty();

    if plain && key == Key::Q {
        app.quit();
        return;
    }
    if plain && key == Key::F {
        if let Some(window) = app.window(model.window_id) {
            let fullscreen = window.is_fullscreen();
            window.set_fullscreen(!fullscreen);
        }
        return;
    }
    if plain && key == Key::X {
        model.command_output = None;
        return;
    }

    if model.lightbox.is_open() {
        match key {
            Key::Escape if plain => {
                model.numeric_prefix = None;
                close_lightbox(app, model);
            }
            Key::Return if plain => close_lightbox(app, model),
            Key::Left | Key::Right | Key::Up | Key::Down if mods.shift() => {
                pan_image(app, model, key);
            }
            Key::Left | Key::Up | Key::H | Key::P if plain => navigate(app, model, false),
            Key::Right | Key::Down | Key::L | Key::N if plain => navigate(app, model, true),
            Key::Home if plain => jump_lightbox(app, model, 0),
            Key::End if plain => jump_lightbox(app, model, len.saturating_sub(1)),
            Key::G => {
                if mods.shift() {
                    let target = match model.numeric_prefix.take() {
                        Some(n) => n.saturating_sub(1).min(len.saturating_sub(1)),
                        None => len.saturating_sub(1),
                    };
                    jump_lightbox(app, model, target);
                } else if plain {
                    model.numeric_prefix = None;
                    jump_lightbox(app, model, 0);
                }
            }
            Key::RBracket if plain => {
                if let Some(index) = model.lightbox.current() {
                    jump_lightbox(app, model, (index + 10).min(len.saturating_sub(1)));
                }
            }
            Key::LBracket if plain => {
                if let Some(index) = model.lightbox.current() {
                    jump_lightbox(app, model, index.saturating_sub(10));
                }
            }
            Key::Equals if plain => zoom_step(app, model, 1.1),
            Key::Minus if plain => zoom_step(app, model, 0.9),
            Key::W if mods.shift() => {
                model.user_zoomed = false;
                apply_fit(app, model);
            }
            _ => {}
        }
    } else {
        match key {
            Key::Return | Key::Space if plain => {
                let selected = model.selected;
                open_lightbox(app, model, selected);
            }
            Key::Left | Key::H if plain => move_selection(app, model, Direction::Left),
            Key::Right | Key::L if plain => move_selection(app, model, Direction::Right),
            Key::Up | Key::K if plain => move_selection(app, model, Direction::Up),
            Key::Down | Key::J if plain => move_selection(app, model, Direction::Down),
            Key::Home if plain => set_selection(app, model, 0),
            Key::End if plain => set_selection(app, model, len.saturating_sub(1)),
            Key::G => {
                if mods.shift() {
                    set_selection(app, model, len.saturating_sub(1));
                } else if plain {
                    set_selection(app, model, 0);
                }
            }
            Key::Equals if plain => {
                model.thumb_size = (model.thumb_size + THUMB_SIZE_STEP).min(MAX_THUMB_SIZE);
            }
            Key::Minus if plain => {
                model.thumb_size = model
                    .thumb_size
                    .saturating_sub(THUMB_SIZE_STEP)
                    .max(MIN_THUMB_SIZE);
            }
            _ => {}
        }
    }

    run_custom_bindings(app, model, key);
}

fn received_character(_app: &App, model: &mut Model, ch: char) {
    if let Some(digit) = ch.to_digit(10) {
        let prefix = model.numeric_prefix.unwrap_or(0);
        model.numeric_prefix = Some(prefix.saturating_mul(10).saturating_add(digit as usize));
    }
}

fn run_custom_bindings(app: &App, model: &Model, key: Key) {
    let index = model.lightbox.current().unwrap_or(model.selected);
    let Some(item) = model.items.get(index) else {
        return;
    };
    let current_file = item.path.to_string_lossy().to_string();
    for binding in &model.key_bindings {
        if key == binding.key
            && app.keys.mods.ctrl() == binding.ctrl
            && app.keys.mods.shift() == binding.shift
            && app.keys.mods.alt() == binding.alt
            && app.keys.mods.logo() == binding.super_key
        {
            let command = binding.command.replace("{file}", &current_file);
            let tx = model.command_tx.clone();
            thread::spawn(move || {
                match std::process::Command::new("sh").arg("-c").arg(&command).output() {
                    Ok(output) => {
                        let stdout = String::from_utf8_lossy(&output.stdout);
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        let mut text = stdout.into_owned();
                        if !stderr.is_empty() {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(&stderr);
                        }
                        let _ = tx.send(text);
                    }
                    Err(err) => {
                        let _ = tx.send(format!("failed to run command: {err}"));
                    }
                }
            });
        }
    }
}

fn mouse_pressed(app: &App, model: &mut Model, button: MouseButton) {
    if button != MouseButton::Left {
        return;
    }
    let pos = app.mouse.position();
    if model.lightbox.is_open() {
        // resolved on release as either a swipe or an affordance click
        model.swipe.begin(pos.x, pos.y);
    } else {
        let Some(rect) = current_window_rect(app, model) else {
            return;
        };
        if let Some(index) = gallery_grid(rect, model).hit_test(pos.x, pos.y) {
            open_lightbox(app, model, index);
        }
    }
}

fn mouse_released(app: &App, model: &mut Model, button: MouseButton) {
    if button != MouseButton::Left || !model.swipe.active() {
        return;
    }
    if !model.lightbox.is_open() {
        model.swipe.cancel();
        return;
    }
    let pos = app.mouse.position();
    match model.swipe.end(pos.x, pos.y) {
        Some(Swipe::Next) => navigate(app, model, true),
        Some(Swipe::Previous) => navigate(app, model, false),
        None => lightbox_click(app, model, pos),
    }
}

/// Window-space rectangle the current image occupies, if it is loaded.
fn image_display_rect(model: &Model) -> Option<Rect> {
    let index = model.lightbox.current()?;
    let tex = model.full_textures.get(&index)?;
    let [w, h] = tex.size();
    Some(Rect::from_x_y_w_h(
        model.pan.x,
        model.pan.y,
        w as f32 * model.zoom,
        h as f32 * model.zoom,
    ))
}

/// A sub-threshold release while open: close, previous, or next depending on
/// where the click landed. Clicks on the image itself do nothing; clicks on
/// the backdrop close.
fn lightbox_click(app: &App, model: &mut Model, pos: Vec2) {
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    if pos.x >= rect.right() - CLOSE_ZONE && pos.y >= rect.top() - CLOSE_ZONE {
        close_lightbox(app, model);
        return;
    }
    if pos.x <= rect.left() + NAV_STRIP_WIDTH {
        navigate(app, model, false);
        return;
    }
    if pos.x >= rect.right() - NAV_STRIP_WIDTH {
        navigate(app, model, true);
        return;
    }
    if pos.y <= rect.bottom() + CAPTION_BAR_H {
        return;
    }
    let on_image = image_display_rect(model).map_or(false, |r| r.contains(pos));
    if !on_image {
        close_lightbox(app, model);
    }
}

fn touch(app: &App, model: &mut Model, event: TouchEvent) {
    if !model.lightbox.is_open() {
        model.swipe.cancel();
        return;
    }
    match event.phase {
        TouchPhase::Started => model.swipe.begin(event.position.x, event.position.y),
        TouchPhase::Ended => match model.swipe.end(event.position.x, event.position.y) {
            Some(Swipe::Next) => navigate(app, model, true),
            Some(Swipe::Previous) => navigate(app, model, false),
            None => {}
        },
        TouchPhase::Cancelled => model.swipe.cancel(),
        TouchPhase::Moved => {}
    }
}

fn mouse_wheel(app: &App, model: &mut Model, delta: MouseScrollDelta, _phase: TouchPhase) {
    if model.lightbox.is_open() {
        // zoom around the cursor; the gallery scroll offset stays locked
        let zoom_factor = match delta {
            MouseScrollDelta::LineDelta(_x, y) => 1.0 + y * 0.2,
            MouseScrollDelta::PixelDelta(pos) => 1.0 + pos.y as f32 * 0.002,
        };
        let mouse = app.mouse.position();
        let old_zoom = model.zoom;
        let new_zoom = (old_zoom * zoom_factor).clamp(0.01, 100.0);
        model.pan = mouse + (model.pan - mouse) * (new_zoom / old_zoom);
        model.zoom = new_zoom;
        model.user_zoomed = true;
    } else {
        let amount = match delta {
            MouseScrollDelta::LineDelta(_x, y) => y * -100.0,
            MouseScrollDelta::PixelDelta(pos) => -pos.y as f32,
        };
        model.scroll_offset += amount;
        let Some(rect) = current_window_rect(app, model) else {
            return;
        };
        let grid = gallery_grid(rect, model);
        model.scroll_offset = model.scroll_offset.clamp(0.0, grid.max_scroll());
    }
}

// ---- update loop ----------------------------------------------------------

fn update(app: &App, model: &mut Model, _update: Update) {
    while let Ok(update) = model.thumb_rx.try_recv() {
        model.thumb_data.insert(update.index, update.image);
    }
    while let Ok(message) = model.command_rx.try_recv() {
        model.command_output = Some(message);
    }
    while let Ok(message) = model.full_resp_rx.try_recv() {
        match message {
            FullImageMessage::Loaded {
                index,
                full_w,
                full_h,
                tiles,
            } => {
                let tiles = tiles
                    .into_iter()
                    .map(|(x_offset, y_offset, width, height, pixel_data)| Tile {
                        x_offset,
                        y_offset,
                        width,
                        height,
                        pixel_data,
                        texture: RefCell::new(None),
                    })
                    .collect();
                model.full_textures.insert(
                    index,
                    TiledTexture {
                        full_w,
                        full_h,
                        tiles,
                    },
                );
                model.full_pending.remove(&index);
                touch_full_texture(model, index);
                if model.full_usage.len() > FULL_CACHE_CAPACITY {
                    if let Some(evicted) = model.full_usage.pop_back() {
                        model.full_textures.remove(&evicted);
                    }
                }
                if model.lightbox.current() == Some(index) && should_fit_image(model) {
                    apply_fit(app, model);
                }
            }
            FullImageMessage::Failed { index, error } => {
                model
                    .full_pending
                    .insert(index, LoadStatus::Failed { at: Instant::now() });
                let what = model
                    .items
                    .get(index)
                    .map(|item| item.path.display().to_string())
                    .unwrap_or_else(|| format!("image index {index}"));
                eprintln!("failed to load {what}: {error}");
                model.full_textures.remove(&index);
                if let Some(pos) = model.full_usage.iter().position(|&i| i == index) {
                    model.full_usage.remove(pos);
                }
            }
        }
    }

    let window_rect = current_window_rect(app, model);
    if let Some(rect) = window_rect {
        if rect != model.prev_window_rect {
            model.prev_window_rect = rect;
            if model.lightbox.is_open() && should_fit_image(model) {
                apply_fit(app, model);
            }
        }
    }

    if let Some(index) = model.lightbox.current() {
        if !model.full_textures.contains_key(&index) {
            request_full_texture(model, index);
        }
    } else {
        if !model.selection_preloaded
            && model.selection_changed_at.elapsed() >= SELECTION_PRELOAD_DELAY
        {
            let selected = model.selected;
            request_full_texture(model, selected);
            model.selection_preloaded = true;
        }
        if let Some(rect) = window_rect {
            let grid = gallery_grid(rect, model);
            model.scroll_offset = model.scroll_offset.clamp(0.0, grid.max_scroll());
        }
        update_thumbnail_requests(app, model);
    }
}

/// Keep uploaded thumbnail textures in sync with the visible grid window
/// and steer the worker queue toward the viewport.
fn update_thumbnail_requests(app: &App, model: &mut Model) {
    if model.items.is_empty() {
        model.thumb_visible.clear();
        return;
    }
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    let grid = gallery_grid(rect, model);
    let visible = grid.visible_indices();

    if (model.scroll_offset - model.prev_scroll).abs() > f32::EPSILON {
        model.prev_scroll = model.scroll_offset;
        model
            .thumb_queue
            .reprioritize(|index| grid.viewport_priority(index));
    }

    let visible_set: std::collections::HashSet<usize> = visible.iter().copied().collect();
    model
        .thumb_visible
        .retain(|index, _| visible_set.contains(index));

    for index in visible {
        let Some((x, y)) = grid.index_center(index) else {
            continue;
        };
        let center = vec2(x, y);
        if let Some(slot) = model.thumb_visible.get_mut(&index) {
            slot.center = center;
            continue;
        }
        if let Some(image) = model.thumb_data.get(&index) {
            let texture = wgpu::Texture::from_image(app, image);
            let size = texture.size();
            model.thumb_visible.insert(
                index,
                ThumbnailTexture {
                    texture,
                    center,
                    size,
                },
            );
        }
    }
}

// ---- view -----------------------------------------------------------------

fn view(app: &App, model: &Model, frame: Frame) {
    let draw = app.draw();
    let Some(rect) = current_window_rect(app, model) else {
        return;
    };
    match model.lightbox.current() {
        None => draw_gallery(&draw, model, rect),
        Some(index) => draw_lightbox(app, &draw, model, rect, index),
    }
    if let Some(output) = &model.command_output {
        draw_command_output(&draw, rect, output);
    }
    draw.to_frame(app, &frame).unwrap();
}

fn draw_gallery(draw: &Draw, model: &Model, rect: Rect) {
    draw.background().color(srgba(0.10, 0.10, 0.11, 1.0));
    let grid = gallery_grid(rect, model);
    let max_dim = model.thumb_size as f32;
    for index in grid.visible_indices() {
        let Some((x, y)) = grid.index_center(index) else {
            continue;
        };
        let (w, h) = if let Some(slot) = model.thumb_visible.get(&index) {
            let tex_w = slot.size[0] as f32;
            let tex_h = slot.size[1] as f32;
            let aspect = tex_w / tex_h;
            let (w, h) = if aspect > 1.0 {
                (max_dim, max_dim / aspect)
            } else {
                (max_dim * aspect, max_dim)
            };
            draw.texture(&slot.texture).x_y(x, y).w_h(w, h);
            (w, h)
        } else {
            draw.rect()
                .x_y(x, y)
                .w_h(max_dim, max_dim)
                .color(srgba(0.18, 0.18, 0.19, 1.0));
            (max_dim, max_dim)
        };
        if index == model.selected {
            draw.rect()
                .x_y(x, y)
                .w_h(w + 4.0, h + 4.0)
                .no_fill()
                .stroke(WHITE)
                .stroke_weight(2.0);
        }
    }

    let bar_y = rect.bottom() + INFO_BAR_H / 2.0;
    draw.rect()
        .x_y(0.0, bar_y)
        .w_h(rect.w(), INFO_BAR_H)
        .color(srgba(0.07, 0.07, 0.08, 1.0));
    if let Some(item) = model.items.get(model.selected) {
        let text_w = rect.w() - 16.0;
        draw.text(&item.path.to_string_lossy())
            .font_size(14)
            .w_h(text_w, INFO_BAR_H)
            .x_y(0.0, bar_y)
            .left_justify()
            .color(srgba(0.85, 0.83, 0.78, 1.0));
        let counter = format!("{} / {}", model.selected + 1, model.items.len());
        draw.text(&counter)
            .font_size(14)
            .w_h(text_w, INFO_BAR_H)
            .x_y(0.0, bar_y)
            .right_justify()
            .color(srgba(0.85, 0.83, 0.78, 1.0));
    }
}

fn ensure_tile_texture(window: &nannou::window::Window, tile: &Tile) -> wgpu::Texture {
    if tile.texture.borrow().is_none() {
        let size = wgpu::Extent3d {
            width: tile.width,
            height: tile.height,
            depth_or_array_layers: 1,
        };
        let descriptor = wgpu::TextureDescriptor {
            label: None,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        };
        let handle = window.device().create_texture(&descriptor);
        window.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &handle,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &tile.pixel_data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * tile.width),
                rows_per_image: Some(tile.height),
            },
            size,
        );
        *tile.texture.borrow_mut() =
            Some(wgpu::Texture::from_handle_and_descriptor(Arc::new(handle), descriptor));
    }
    tile.texture.borrow().as_ref().unwrap().clone()
}

fn draw_lightbox(app: &App, draw: &Draw, model: &Model, rect: Rect, index: usize) {
    draw.background().color(srgba(0.04, 0.04, 0.05, 1.0));

    if let Some(tex) = model.full_textures.get(&index) {
        let Some(window) = app.window(model.window_id) else {
            return;
        };
        let [full_w, full_h] = tex.size();
        for tile in &tex.tiles {
            let texture = ensure_tile_texture(&window, tile);
            let x_center = tile.x_offset as f32 - full_w as f32 / 2.0 + tile.width as f32 / 2.0;
            let y_center = full_h as f32 / 2.0 - tile.y_offset as f32 - tile.height as f32 / 2.0;
            let x = model.pan.x + x_center * model.zoom;
            let y = model.pan.y + y_center * model.zoom;
            draw.texture(&texture)
                .x_y(x, y)
                .w_h(tile.width as f32 * model.zoom, tile.height as f32 * model.zoom);
        }
    } else {
        let message = match model.full_pending.get(&index) {
            Some(LoadStatus::Failed { .. }) => "unable to load image",
            _ => "loading…",
        };
        draw.text(message)
            .font_size(18)
            .x_y(0.0, 0.0)
            .color(srgba(0.7, 0.7, 0.7, 1.0));
    }

    let affordance = srgba(0.9, 0.9, 0.9, 0.8);
    draw.text("‹")
        .font_size(48)
        .x_y(rect.left() + NAV_STRIP_WIDTH / 2.0, 0.0)
        .color(affordance);
    draw.text("›")
        .font_size(48)
        .x_y(rect.right() - NAV_STRIP_WIDTH / 2.0, 0.0)
        .color(affordance);
    draw.text("×")
        .font_size(28)
        .x_y(
            rect.right() - CLOSE_ZONE / 2.0,
            rect.top() - CLOSE_ZONE / 2.0,
        )
        .color(affordance);

    let Some(item) = model.items.get(index) else {
        return;
    };
    let bar_y = rect.bottom() + CAPTION_BAR_H / 2.0;
    draw.rect()
        .x_y(0.0, bar_y)
        .w_h(rect.w(), CAPTION_BAR_H)
        .color(srgba(0.0, 0.0, 0.0, 0.6));
    let text_w = rect.w() - 32.0;
    draw.text(item.caption_title())
        .font_size(16)
        .w_h(text_w, 20.0)
        .x_y(0.0, bar_y + 12.0)
        .left_justify()
        .color(srgba(0.95, 0.93, 0.88, 1.0));
    if let Some(description) = &item.description {
        draw.text(description)
            .font_size(13)
            .w_h(text_w, 18.0)
            .x_y(0.0, bar_y - 10.0)
            .left_justify()
            .color(srgba(0.75, 0.73, 0.70, 1.0));
    }
    if let Some(counter) = model.lightbox.counter() {
        draw.text(&counter)
            .font_size(14)
            .w_h(text_w, 20.0)
            .x_y(0.0, bar_y + 12.0)
            .right_justify()
            .color(srgba(0.80, 0.80, 0.80, 1.0));
    }
}

fn draw_command_output(draw: &Draw, rect: Rect, output: &str) {
    let box_height = rect.h() / 2.0;
    let box_center_y = rect.h() / 4.0;
    draw.rect()
        .x_y(0.0, box_center_y)
        .w_h(rect.w(), box_height)
        .color(srgba(0.0, 0.0, 0.0, 0.8));
    let font_size = 16;
    let margin = 10.0;
    let line_spacing = 2.0;
    let text_width = rect.w() - 2.0 * margin;
    let mut y = rect.h() / 2.0 - margin - (font_size as f32) / 2.0;
    for line in output.lines() {
        if y < 0.0 {
            break;
        }
        draw.text(line)
            .font_size(font_size)
            .w_h(text_width, font_size as f32)
            .x_y(0.0, y)
            .left_justify()
            .color(srgba(0.92, 0.86, 0.70, 1.0));
        y -= font_size as f32 + line_spacing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_is_sharded_by_hash() {
        let base = Path::new("/cache/galbox");
        let path = thumbnail_cache_path(base, Path::new("/photos/a.jpg"));
        assert!(path.starts_with(base));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        // 3-char shard directory, 37-char file stem
        let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(shard.len(), 3);
        assert_eq!(path.file_stem().unwrap().to_str().unwrap().len(), 37);
    }

    #[test]
    fn cache_path_differs_per_image() {
        let base = Path::new("/cache/galbox");
        let a = thumbnail_cache_path(base, Path::new("/photos/a.jpg"));
        let b = thumbnail_cache_path(base, Path::new("/photos/b.jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn orientation_from_urational_rounds_exactly() {
        let value = rexif::TagValue::URational(vec![rexif::URational {
            numerator: 6,
            denominator: 2,
        }]);
        assert_eq!(exif_orientation(&value), Some(3));
    }

    #[test]
    fn orientation_from_irational_with_negative_denominator() {
        let value = rexif::TagValue::IRational(vec![rexif::IRational {
            numerator: -12,
            denominator: -2,
        }]);
        assert_eq!(exif_orientation(&value), Some(6));
    }

    #[test]
    fn orientation_rejects_non_integer_ratio() {
        let value = rexif::TagValue::IRational(vec![rexif::IRational {
            numerator: 3,
            denominator: 2,
        }]);
        assert_eq!(exif_orientation(&value), None);
    }

    #[test]
    fn orientation_rejects_out_of_range_codes() {
        let value = rexif::TagValue::U16(vec![0]);
        assert_eq!(exif_orientation(&value), None);
        let value = rexif::TagValue::U16(vec![9]);
        assert_eq!(exif_orientation(&value), None);
        let value = rexif::TagValue::U16(vec![8]);
        assert_eq!(exif_orientation(&value), Some(8));
    }
}
