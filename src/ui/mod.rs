use std::{sync::Arc, time::Instant};

use crossbeam_channel::Receiver;
use gpui::{
    AnyElement, App, AppContext, Context, FocusHandle, Hsla, InteractiveElement, IntoElement,
    KeyDownEvent, ObjectFit, ParentElement, Render, RenderImage, Styled, StyledImage,
    TitlebarOptions, Window, WindowControlArea, WindowDecorations, WindowOptions, div, img, px,
};
use gpui_component::{Root, h_flex, v_flex};

use crate::pipeline::{PresentedFrame, PumpCommand, PumpControl};

mod render_util;
mod titlebar;

use render_util::{FpsCounter, frame_to_image, latest_per_view};

const PANEL_SIZE: (f32, f32) = (640.0, 480.0);

/// Everything the viewer needs from the running sample.
pub struct ViewerSetup {
    pub title: String,
    pub frames: Receiver<PresentedFrame>,
    pub controls: Vec<PumpControl>,
    /// Whether `m` and `c` reach the streams.
    pub stream_controls: bool,
}

pub fn launch_ui(app: &mut App, setup: ViewerSetup) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(setup.title.clone().into()),
            appears_transparent: true,
            traffic_light_position: None,
        }),
        window_decorations: Some(WindowDecorations::Client),
        ..Default::default()
    };

    let controls = setup.controls.clone();
    app.on_window_closed(move |cx| {
        for control in &controls {
            control.stop();
        }
        cx.quit();
    })
    .detach();

    app.open_window(window_options, move |window, app| {
        let view = app.new(|cx| {
            let view = AppView::new(setup, cx);
            window.focus(&view.focus_handle);
            view
        });
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

/// One image panel per presented view, in order of first appearance.
struct Panel {
    view: String,
    image: Option<Arc<RenderImage>>,
    size: (u32, u32),
    fps: FpsCounter,
}

struct AppView {
    title: String,
    frames: Receiver<PresentedFrame>,
    controls: Vec<PumpControl>,
    stream_controls: bool,
    focus_handle: FocusHandle,
    panels: Vec<Panel>,
    last_caption: Option<String>,
}

impl AppView {
    fn new(setup: ViewerSetup, cx: &mut Context<'_, Self>) -> Self {
        Self {
            title: setup.title,
            frames: setup.frames,
            controls: setup.controls,
            stream_controls: setup.stream_controls,
            focus_handle: cx.focus_handle(),
            panels: Vec::new(),
            last_caption: None,
        }
    }

    fn drain_frames(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let now = Instant::now();
        let (newest, caption) = latest_per_view(self.frames.try_iter());
        if caption.is_some() {
            self.last_caption = caption;
        }

        for frame in newest {
            let Some(image) = frame_to_image(&frame.buffer) else {
                log::warn!("{}: frame could not be turned into an image", frame.view);
                continue;
            };

            let index = match self.panels.iter().position(|p| p.view == frame.view) {
                Some(index) => index,
                None => {
                    self.panels.push(Panel {
                        view: frame.view.clone(),
                        image: None,
                        size: (0, 0),
                        fps: FpsCounter::new(now),
                    });
                    self.panels.len() - 1
                }
            };
            let panel = &mut self.panels[index];
            panel.size = (frame.buffer.width(), frame.buffer.height());
            panel.fps.tick(now);
            if let Some(old_image) = panel.image.replace(image) {
                // Explicitly drop the previous GPU texture; otherwise the sprite atlas keeps
                // every frame and memory will climb rapidly while the streams are running.
                cx.drop_image(old_image, Some(window));
            }
        }
    }

    fn broadcast(&self, command: PumpCommand) {
        for control in &self.controls {
            if !control.send(command) {
                log::debug!("pump already gone, {command:?} ignored");
            }
        }
    }

    fn on_key_down(
        &mut self,
        event: &KeyDownEvent,
        _: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        match event.keystroke.key.as_str() {
            "q" | "escape" => {
                for control in &self.controls {
                    control.stop();
                }
                cx.quit();
            }
            "m" if self.stream_controls => self.broadcast(PumpCommand::ToggleMirroring),
            "c" if self.stream_controls => self.broadcast(PumpCommand::ToggleCropping),
            _ => {}
        }
    }

    fn render_panel(&self, panel: &Panel) -> AnyElement {
        let body: AnyElement = match &panel.image {
            Some(image) => img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element(),
            None => div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("waiting for frames...")
                .into_any_element(),
        };

        v_flex()
            .rounded_lg()
            .overflow_hidden()
            .bg(gpui::rgb(0x0f1419))
            .child(
                div()
                    .w(px(PANEL_SIZE.0))
                    .h(px(PANEL_SIZE.1))
                    .bg(gpui::rgb(0x000000))
                    .child(body),
            )
            .child(
                h_flex()
                    .p_2()
                    .justify_between()
                    .text_xs()
                    .text_color(gpui::rgb(0xa0aab8))
                    .child(panel.view.clone())
                    .child(format!(
                        "{}x{}  {:.1} fps",
                        panel.size.0,
                        panel.size.1,
                        panel.fps.fps()
                    )),
            )
            .into_any_element()
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.drain_frames(window, cx);

        let titlebar = self.render_titlebar(window, cx);
        let panels: Vec<AnyElement> = self.panels.iter().map(|p| self.render_panel(p)).collect();
        let content: AnyElement = if panels.is_empty() {
            div()
                .flex_1()
                .flex()
                .items_center()
                .justify_center()
                .text_color(gpui::rgb(0x8b95a5))
                .child(format!("{}: starting streams...", self.title))
                .into_any_element()
        } else {
            h_flex()
                .flex_1()
                .flex_wrap()
                .gap_3()
                .p_4()
                .items_start()
                .children(panels)
                .into_any_element()
        };

        v_flex()
            .size_full()
            .bg(gpui::rgb(0x1a2332))
            .track_focus(&self.focus_handle)
            .on_key_down(cx.listener(Self::on_key_down))
            .child(titlebar)
            .child(content)
    }
}
