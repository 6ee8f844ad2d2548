use super::{
    AnyElement, AppView, Context, Hsla, InteractiveElement, IntoElement, ParentElement, Styled,
    Window, WindowControlArea, div, h_flex, px,
};

const TITLEBAR_BG: u32 = 0x1a2332;

fn badge(text: String, color: Hsla) -> AnyElement {
    div()
        .px_2()
        .py_0p5()
        .rounded_md()
        .bg(gpui::rgba(0x00000033))
        .text_xs()
        .text_color(color)
        .child(text)
        .into_any_element()
}

impl AppView {
    pub(super) fn render_titlebar(
        &self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let muted: Hsla = gpui::rgb(0xa0aab8).into();
        let live: Hsla = gpui::rgb(0x4ade80).into();
        let caption: Hsla = gpui::rgb(0xfacc15).into();

        let mut status = h_flex()
            .gap_3()
            .pl(px(80.0))
            .pr_3()
            .h_full()
            .items_center()
            .child(badge(self.title.clone(), muted));
        for panel in &self.panels {
            let color = if panel.fps.fps() > 0.0 { live } else { muted };
            status = status.child(badge(
                format!("{} {:.0} fps", panel.view, panel.fps.fps()),
                color,
            ));
        }
        if let Some(text) = &self.last_caption {
            status = status.child(badge(text.clone(), caption));
        }
        let hint = if self.stream_controls {
            "q quit · m mirror · c crop"
        } else {
            "q quit"
        };
        status = status.child(badge(hint.to_string(), muted));

        h_flex()
            .window_control_area(WindowControlArea::Drag)
            .h(px(32.0))
            .w_full()
            .items_center()
            .justify_between()
            .bg(gpui::rgb(TITLEBAR_BG))
            .child(status)
            .child(self.render_window_controls(window, cx))
            .into_any_element()
    }

    #[cfg(target_os = "macos")]
    fn render_window_controls(
        &self,
        _window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        // Traffic lights are drawn by the system.
        div().into_any_element()
    }

    #[cfg(target_os = "windows")]
    fn render_window_controls(
        &self,
        window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let maximize = if window.is_maximized() {
            "\u{e923}"
        } else {
            "\u{e922}"
        };
        let button = |id: &'static str, area: WindowControlArea, glyph: &'static str, hover: u32| {
            div()
                .id(id)
                .flex()
                .items_center()
                .justify_center()
                .occlude()
                .w(px(46.0))
                .h_full()
                .text_size(px(10.0))
                .hover(move |s| s.bg(gpui::rgb(hover)))
                .window_control_area(area)
                .child(glyph)
        };

        h_flex()
            .id("windows-window-controls")
            .font_family("Segoe Fluent Icons")
            .h(px(32.0))
            .child(button("minimize", WindowControlArea::Min, "\u{e921}", 0x404040))
            .child(button("maximize-or-restore", WindowControlArea::Max, maximize, 0x404040))
            .child(button("close", WindowControlArea::Close, "\u{e8bb}", 0xe81123))
            .into_any_element()
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn render_window_controls(
        &self,
        _window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let icon_color = gpui::rgb(0xc9d1d9);
        let button = |id: &'static str, area: WindowControlArea, path: &'static str, hover: u32| {
            div()
                .id(id)
                .size(px(28.0))
                .flex()
                .items_center()
                .justify_center()
                .rounded_md()
                .cursor_pointer()
                .window_control_area(area)
                .hover(move |s| s.bg(gpui::rgb(hover)))
                .child(gpui::svg().size(px(16.0)).path(path).text_color(icon_color))
        };

        h_flex()
            .gap_1()
            .px_2()
            .child(button(
                "linux-minimize",
                WindowControlArea::Min,
                "M 4,8 H 12",
                0x1f2428,
            ))
            .child(button(
                "linux-maximize",
                WindowControlArea::Max,
                "M 4,4 H 12 V 12 H 4 Z",
                0x1f2428,
            ))
            .child(button(
                "linux-close",
                WindowControlArea::Close,
                "M 4,4 L 12,12 M 12,4 L 4,12",
                0xe81123,
            ))
            .into_any_element()
    }
}
