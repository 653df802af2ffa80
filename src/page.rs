//! The dashboard page: selection controls plus the map frame.

use crate::view::{Detail, MapContent, RenderedView, Selection, ViewMode};
use anyhow::Result;
use std::fmt::Write;

const VIEW_LABELS: [(&str, &str); 3] = [
    ("region", "Vista individual de estado/municipio"),
    ("states", "Vista de todos los estados"),
    ("municipalities", "Vista de todos los municipios"),
];

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn checked(on: bool) -> &'static str {
    if on { " checked" } else { "" }
}

pub fn dashboard_page(
    selection: &Selection,
    years: &[i32],
    state_names: &[&str],
    rendered: &RenderedView,
) -> Result<String> {
    let mut controls = String::new();

    controls.push_str("<h3>Selecciona el año:</h3>\n<div class=\"row\">\n");
    for year in years {
        writeln!(
            controls,
            "<label><input type=\"radio\" name=\"year\" value=\"{year}\"{} onchange=\"this.form.submit()\"> {year}</label>",
            checked(*year == selection.year),
        )?;
    }
    controls.push_str("</div>\n<h3>Selecciona la vista</h3>\n<div class=\"column\">\n");
    for (value, label) in VIEW_LABELS {
        writeln!(
            controls,
            "<label><input type=\"radio\" name=\"view\" value=\"{value}\"{} onchange=\"this.form.submit()\"> {label}</label>",
            checked(selection.mode.param() == value),
        )?;
    }
    controls.push_str("</div>\n");

    if let ViewMode::SingleRegion { state, detail } = &selection.mode {
        controls.push_str("<label for=\"state\">Selecciona un estado:</label>\n");
        controls.push_str("<select id=\"state\" name=\"state\" onchange=\"this.form.submit()\">\n");
        for name in state_names {
            let name = escape_html(name);
            writeln!(
                controls,
                "<option value=\"{name}\"{}>{name}</option>",
                if escape_html(state) == name { " selected" } else { "" },
            )?;
        }
        controls.push_str("</select>\n");
        writeln!(
            controls,
            "<label><input type=\"checkbox\" name=\"municipalities\"{} onchange=\"this.form.submit()\"> Vista de municipios validos de {}</label>",
            checked(*detail == Detail::Municipality),
            escape_html(state),
        )?;
    }

    let frame = match &rendered.content {
        MapContent::Built(document) => map_frame(&document.to_html()?, 700, 500),
        MapContent::Embedded { html, .. } => map_frame(html, 800, 600),
        MapContent::Missing { .. } => String::new(),
    };

    let caption = rendered.caption.as_deref()
        .map(|c| format!("<p class=\"caption\">{}</p>", escape_html(c)))
        .unwrap_or_default();

    Ok(PAGE_TEMPLATE
        .replace("__CONTROLS__", &controls)
        .replace("__CAPTION__", &caption)
        .replace("__MAP__", &frame))
}

fn map_frame(document: &str, width: u32, height: u32) -> String {
    format!(
        "<iframe class=\"map\" width=\"{width}\" height=\"{height}\" srcdoc=\"{}\"></iframe>",
        escape_html(document)
    )
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1.0" />
<title>Mapa interactivo de México</title>
<style>
  body { font-family: "Source Sans Pro", sans-serif; max-width: 860px; margin: 2rem auto; padding: 0 1rem; color: #31333f; }
  h1 { font-size: 2.2rem; }
  h3 { margin-bottom: 0.4rem; }
  .row label { margin-right: 1rem; }
  .column label { display: block; margin: 0.2rem 0; }
  select { display: block; margin: 0.4rem 0 0.8rem; min-width: 18rem; }
  .caption { margin: 1rem 0 0.5rem; }
  iframe.map { border: 0; display: block; }
</style>
</head>
<body>
<h1>Mapa interactivo de México</h1>
<form method="get" action="/">
__CONTROLS__
</form>
__CAPTION__
__MAP__
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::render::MapDocument;
    use std::path::PathBuf;

    fn region_selection(detail: Detail) -> Selection {
        Selection {
            year: 2020,
            mode: ViewMode::SingleRegion { state: "Jalisco".to_string(), detail },
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    fn single_region_page_shows_all_controls() {
        let rendered = RenderedView {
            content: MapContent::Built(MapDocument::new(&MapConfig::default())),
            caption: Some("Mostrando la vista del estado completo: Jalisco".to_string()),
        };

        let html = dashboard_page(
            &region_selection(Detail::State),
            &[2018, 2020, 2022],
            &["Ciudad de México", "Jalisco"],
            &rendered,
        )
        .unwrap();

        assert!(html.contains(r#"value="2020" checked"#));
        assert!(html.contains(r#"value="region" checked"#));
        assert!(html.contains(r#"<option value="Jalisco" selected>"#));
        assert!(html.contains(r#"name="municipalities" onchange"#));
        assert!(html.contains("Mostrando la vista del estado completo: Jalisco"));
        assert!(html.contains(r#"width="700" height="500""#));
    }

    #[test]
    fn municipality_toggle_is_checked() {
        let rendered = RenderedView {
            content: MapContent::Built(MapDocument::new(&MapConfig::default())),
            caption: None,
        };
        let html = dashboard_page(&region_selection(Detail::Municipality), &[2020], &["Jalisco"], &rendered).unwrap();

        assert!(html.contains(r#"name="municipalities" checked"#));
    }

    #[test]
    fn missing_document_renders_no_frame() {
        let selection = Selection { year: 2018, mode: ViewMode::AllStates };
        let rendered = RenderedView {
            content: MapContent::Missing { path: PathBuf::from("maps/2018_ent_map.html") },
            caption: None,
        };

        let html = dashboard_page(&selection, &[2018], &["Jalisco"], &rendered).unwrap();

        assert!(!html.contains("<iframe"));
        assert!(!html.contains("<select"));
        assert!(html.contains(r#"value="states" checked"#));
    }

    #[test]
    fn embedded_document_is_escaped_into_srcdoc() {
        let selection = Selection { year: 2018, mode: ViewMode::AllMunicipalities };
        let rendered = RenderedView {
            content: MapContent::Embedded {
                path: PathBuf::from("maps/2018_mpio_map.html"),
                html: "<p class=\"x\">hola</p>".to_string(),
            },
            caption: None,
        };

        let html = dashboard_page(&selection, &[2018], &[], &rendered).unwrap();

        assert!(html.contains(r#"srcdoc="&lt;p class=&quot;x&quot;&gt;hola&lt;/p&gt;""#));
        assert!(html.contains(r#"width="800" height="600""#));
    }
}
