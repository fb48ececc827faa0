use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use image::imageops::{self, FilterType};
use image::Rgba;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use unicode_width::UnicodeWidthStr;

use crate::decode::Bitmap;
use crate::library::MapLibrary;
use crate::list::MapList;
use crate::map::MapDefinition;
use crate::present::{Presented, PreviewBoard};
use crate::slot::{PreviewState, Slot};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 8] = ["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];
const DETAIL_LINES: u16 = 3;
const FOOTER_TEXT: &str =
    "j/k move · PgUp/PgDn page · g/G first/last · Enter choose · r rescan · q quit";

pub struct Options {
    pub list: MapList,
    pub board: Arc<PreviewBoard>,
    pub library: Option<Arc<MapLibrary>>,
    pub source_label: String,
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Model {
    list: MapList,
    board: Arc<PreviewBoard>,
    library: Option<Arc<MapLibrary>>,
    source_label: String,
    board_revision: u64,
    needs_redraw: bool,
    spinner: Spinner,
    chosen: Option<MapDefinition>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        Self {
            list: opts.list,
            board: opts.board,
            library: opts.library,
            source_label: opts.source_label,
            board_revision: 0,
            needs_redraw: true,
            spinner: Spinner::new(),
            chosen: None,
        }
    }

    /// Runs until the user quits or picks a map; returns the pick.
    pub fn run(&mut self) -> Result<Option<MapDefinition>> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result?;
        self.list.detach();
        Ok(self.chosen.take())
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            self.sync();
            self.list.set_viewport(list_rows(terminal.size()?));

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key.code) {
                            break;
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn sync(&mut self) {
        if self.list.poll() {
            self.mark_dirty();
        }
        let revision = self.board.revision();
        if revision != self.board_revision {
            self.board_revision = revision;
            self.mark_dirty();
        }
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.list
            .slots()
            .iter()
            .any(|slot| slot.state() == PreviewState::Pending)
    }

    /// Returns true when the loop should exit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('j') | KeyCode::Down => self.list.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.list.move_selection(-1),
            KeyCode::PageDown => self.list.page_down(),
            KeyCode::PageUp => self.list.page_up(),
            KeyCode::Char('g') | KeyCode::Home => self.list.select_first(),
            KeyCode::Char('G') | KeyCode::End => self.list.select_last(),
            KeyCode::Char('r') => {
                if let Some(library) = &self.library {
                    library.rescan();
                }
            }
            KeyCode::Enter => {
                if let Some(map) = self.list.activate_selected() {
                    self.chosen = Some(map);
                    return true;
                }
            }
            _ => return false,
        }
        self.mark_dirty();
        false
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_message = format!(
            "{} maps in {}",
            self.list.snapshot().len(),
            self.source_label
        );
        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), status_message)
        } else {
            status_message
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(layout[1]);
        self.draw_maps(frame, main_chunks[0]);
        self.draw_preview(frame, main_chunks[1]);

        let footer = Paragraph::new(FOOTER_TEXT)
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);
    }

    fn draw_maps(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = pane_block("Maps", true);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.list.snapshot().is_empty() {
            let empty = Paragraph::new("No maps found.")
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center);
            frame.render_widget(empty, inner);
            return;
        }

        let selected = self.list.selected_row();
        let lines: Vec<Line<'static>> = self
            .list
            .slots()
            .iter()
            .filter(|slot| slot.labels().is_some())
            .map(|slot| row_line(slot, inner.width, selected == Some(slot.index())))
            .collect();
        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn draw_preview(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = pane_block("Preview", false);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let Some(slot) = self.list.selected_row().and_then(|row| self.list.slot(row)) else {
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(DETAIL_LINES)])
            .split(inner);

        match self.board.get(slot.index()) {
            Some(Presented::Bitmap(bitmap)) => {
                let lines = half_block_lines(&bitmap, chunks[0].width, chunks[0].height);
                frame.render_widget(
                    Paragraph::new(Text::from(lines)).alignment(Alignment::Center),
                    chunks[0],
                );
            }
            _ => {
                let (label, color) = match slot.state() {
                    PreviewState::Failed => ("no preview available", COLOR_ERROR),
                    _ => ("loading preview...", COLOR_TEXT_SECONDARY),
                };
                let placeholder = Paragraph::new(label)
                    .style(Style::default().fg(color))
                    .alignment(Alignment::Center);
                frame.render_widget(placeholder, chunks[0]);
            }
        }

        if let Some(labels) = slot.labels() {
            let mut details = vec![
                Line::from(Span::styled(
                    labels.name.clone(),
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    format!("Players: {}", labels.players),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                )),
            ];
            if let Some(date) = &labels.date {
                details.push(Line::from(Span::styled(
                    format!("Created: {date}"),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
            }
            frame.render_widget(Paragraph::new(Text::from(details)), chunks[1]);
        }
    }
}

fn pane_block(title: &'static str, focused: bool) -> Block<'static> {
    let border_style = if focused {
        Style::default().fg(COLOR_BORDER_FOCUSED)
    } else {
        Style::default().fg(COLOR_BORDER_IDLE)
    };
    Block::default()
        .title(Span::styled(
            title,
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(border_style)
        .style(Style::default().bg(COLOR_PANEL_BG))
}

/// Rows available for map entries once the status line, footer and borders are taken.
fn list_rows(area: Rect) -> usize {
    area.height.saturating_sub(4) as usize
}

fn state_glyph(state: PreviewState) -> &'static str {
    match state {
        PreviewState::Empty => " ",
        PreviewState::Pending => "…",
        PreviewState::Ready => "▣",
        PreviewState::Failed => "×",
    }
}

fn row_line(slot: &Slot, width: u16, selected: bool) -> Line<'static> {
    let Some(labels) = slot.labels() else {
        return Line::default();
    };
    let width = width as usize;
    let mut tail = format!("  {}", labels.players);
    if let Some(date) = &labels.date {
        tail.push_str(&format!("  {date}"));
    }
    let glyph = state_glyph(slot.state());
    let name_width = width
        .saturating_sub(UnicodeWidthStr::width(tail.as_str()))
        .saturating_sub(2);
    let name = fit_to_width(&labels.name, name_width);

    let bg = if selected {
        COLOR_PANEL_SELECTED_BG
    } else {
        COLOR_PANEL_BG
    };
    let mut line = Line::from(vec![
        Span::styled(
            format!("{glyph} "),
            Style::default().fg(COLOR_TEXT_SECONDARY).bg(bg),
        ),
        Span::styled(
            name,
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(bg)
                .add_modifier(if selected {
                    Modifier::BOLD
                } else {
                    Modifier::empty()
                }),
        ),
        Span::styled(tail, Style::default().fg(COLOR_TEXT_SECONDARY).bg(bg)),
    ]);
    pad_line_to_width(&mut line, width);
    line
}

/// Truncates with an ellipsis, or pads with spaces, to exactly `width` columns.
fn fit_to_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    let full = UnicodeWidthStr::width(text);
    let budget = if full > width {
        width.saturating_sub(1)
    } else {
        width
    };
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w > budget {
            break;
        }
        out.push(ch);
        used += w;
    }
    if full > width && width > 0 {
        out.push('…');
        used += 1;
    }
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

fn pad_line_to_width(line: &mut Line<'static>, width: usize) {
    let current: usize = line
        .spans
        .iter()
        .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
        .sum();
    if current >= width {
        return;
    }
    let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
    line.spans
        .push(Span::styled(" ".repeat(width - current), pad_style));
}

fn cell_color(pixel: &Rgba<u8>) -> Color {
    if pixel.0[3] == 0 {
        return COLOR_PANEL_BG;
    }
    Color::Rgb(pixel.0[0], pixel.0[1], pixel.0[2])
}

/// Renders a bitmap with upper-half blocks, two pixel rows per terminal row,
/// scaled to fit `cols` x `rows` cells with the aspect ratio kept.
fn half_block_lines(bitmap: &Bitmap, cols: u16, rows: u16) -> Vec<Line<'static>> {
    let (width, height) = bitmap.dimensions();
    if cols == 0 || rows == 0 || width == 0 || height == 0 {
        return Vec::new();
    }
    let max_w = f64::from(cols);
    let max_h = f64::from(rows) * 2.0;
    let scale = (max_w / f64::from(width)).min(max_h / f64::from(height));
    let target_w = ((f64::from(width) * scale).floor() as u32).clamp(1, u32::from(cols));
    let target_h = ((f64::from(height) * scale).floor() as u32).clamp(1, u32::from(rows) * 2);
    let scaled = imageops::resize(&**bitmap, target_w, target_h, FilterType::Nearest);

    let mut lines = Vec::with_capacity(target_h.div_ceil(2) as usize);
    for y in (0..target_h).step_by(2) {
        let spans: Vec<Span<'static>> = (0..target_w)
            .map(|x| {
                let top = cell_color(scaled.get_pixel(x, y));
                let bottom = if y + 1 < target_h {
                    cell_color(scaled.get_pixel(x, y + 1))
                } else {
                    COLOR_PANEL_BG
                };
                Span::styled("▀", Style::default().fg(top).bg(bottom))
            })
            .collect();
        lines.push(Line::from(spans));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn half_blocks_pair_pixel_rows() {
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
        let bitmap: Bitmap = Arc::new(image);

        let lines = half_block_lines(&bitmap, 2, 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].spans.len(), 2);
        let first = lines[0].spans[0].style;
        assert_eq!(first.fg, Some(Color::Rgb(255, 0, 0)));
        assert_eq!(first.bg, Some(Color::Rgb(0, 0, 255)));
        // Transparent pixels blend into the panel.
        assert_eq!(lines[0].spans[1].style.fg, Some(COLOR_PANEL_BG));
    }

    #[test]
    fn half_blocks_keep_aspect_ratio() {
        let bitmap: Bitmap = Arc::new(RgbaImage::from_pixel(40, 20, Rgba([1, 2, 3, 255])));
        let lines = half_block_lines(&bitmap, 10, 10);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.spans.len() == 10));
        assert!(half_block_lines(&bitmap, 0, 5).is_empty());
    }

    #[test]
    fn fit_truncates_and_pads() {
        assert_eq!(fit_to_width("Valley", 8), "Valley  ");
        assert_eq!(fit_to_width("Green Valley", 6), "Green…");
        assert_eq!(fit_to_width("abc", 0), "");
    }

    #[test]
    fn list_rows_leaves_room_for_chrome() {
        assert_eq!(list_rows(Rect::new(0, 0, 80, 24)), 20);
        assert_eq!(list_rows(Rect::new(0, 0, 80, 2)), 0);
    }
}
