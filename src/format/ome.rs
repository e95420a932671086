//! OME `ImageDescription` XML parsing.
//!
//! Olympus OME-TIFF payloads describe their pyramid in the first
//! directory's ImageDescription tag. Only the fields the reader consumes
//! are extracted: experimenter user name (used by detection), microscope
//! manufacturer/model, and per-image acquisition date, pixel geometry,
//! physical pixel size, channels and exposure times.
//!
//! Numeric attributes are parsed with `str::parse`, which is
//! locale-independent.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::SlideError;

/// One `Channel` element under `Pixels`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OmeChannel {
    pub name: Option<String>,
    pub emission_wavelength: Option<i32>,
    pub color: Option<i32>,
}

/// One `Image` element: a pyramid level description.
#[derive(Debug, Clone, Default)]
pub struct OmeImage {
    pub acquisition_date: Option<String>,
    pub size_x: u32,
    pub size_y: u32,
    pub physical_size_x: Option<f64>,
    pub physical_size_y: Option<f64>,
    pub channels: Vec<OmeChannel>,
    pub exposure_times: Vec<f64>,
}

/// Parsed OME description.
#[derive(Debug, Clone, Default)]
pub struct OmeDescription {
    pub experimenter_user_name: Option<String>,
    pub microscope_manufacturer: Option<String>,
    pub microscope_model: Option<String>,
    pub images: Vec<OmeImage>,
}

impl OmeDescription {
    /// Parse an OME XML document.
    pub fn parse(xml: &str) -> Result<Self, SlideError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut desc = OmeDescription::default();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader
                .read_event()
                .map_err(|e| SlideError::Decode(format!("OME XML: {}", e)))?
            {
                Event::Start(ref e) => {
                    let name = local_name(e);
                    path.push(name.clone());
                    desc.handle_element(&path, e)?;
                }
                Event::Empty(ref e) => {
                    let name = local_name(e);
                    path.push(name);
                    desc.handle_element(&path, e)?;
                    path.pop();
                }
                Event::Text(ref t) => {
                    if path_is(&path, &["OME", "Image", "AcquisitionDate"]) {
                        if let Some(img) = desc.images.last_mut() {
                            let text = t
                                .unescape()
                                .map_err(|e| SlideError::Decode(format!("OME XML: {}", e)))?;
                            img.acquisition_date = Some(text.into_owned());
                        }
                    }
                }
                Event::End(_) => {
                    path.pop();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if desc.images.is_empty() {
            return Err(SlideError::Decode(
                "OME XML has no Image elements".to_string(),
            ));
        }

        Ok(desc)
    }

    /// Channel count of the pyramid (from the first image; 1 when the
    /// description carries no channels).
    pub fn channel_count(&self) -> u32 {
        self.images
            .first()
            .map(|img| img.channels.len() as u32)
            .unwrap_or(0)
            .max(1)
    }

    fn handle_element(&mut self, path: &[String], e: &BytesStart<'_>) -> Result<(), SlideError> {
        if path_is(path, &["OME", "Experimenter"]) {
            self.experimenter_user_name = attr(e, "UserName");
        } else if path_is(path, &["OME", "Instrument", "Microscope"]) {
            self.microscope_manufacturer = attr(e, "Manufacturer");
            self.microscope_model = attr(e, "Model");
        } else if path_is(path, &["OME", "Image"]) {
            self.images.push(OmeImage::default());
        } else if path_is(path, &["OME", "Image", "Pixels"]) {
            let img = self.images.last_mut().ok_or_else(|| {
                SlideError::Decode("OME XML: Pixels outside Image".to_string())
            })?;
            img.size_x = req_attr_parse(e, "SizeX")?;
            img.size_y = req_attr_parse(e, "SizeY")?;
            img.physical_size_x = attr_parse(e, "PhysicalSizeX");
            img.physical_size_y = attr_parse(e, "PhysicalSizeY");
        } else if path_is(path, &["OME", "Image", "Pixels", "Channel"]) {
            if let Some(img) = self.images.last_mut() {
                img.channels.push(OmeChannel {
                    name: attr(e, "Name"),
                    emission_wavelength: attr_parse(e, "EmissionWavelength"),
                    color: attr_parse(e, "Color"),
                });
            }
        } else if path_is(path, &["OME", "Image", "Pixels", "Plane"]) {
            if let Some(img) = self.images.last_mut() {
                if let Some(t) = attr_parse::<f64>(e, "ExposureTime") {
                    img.exposure_times.push(t);
                }
            }
        }
        Ok(())
    }
}

/// Local (prefix-stripped) element name.
fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn path_is(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn attr_parse<T: std::str::FromStr>(e: &BytesStart<'_>, name: &str) -> Option<T> {
    attr(e, name).and_then(|v| v.parse().ok())
}

fn req_attr_parse<T: std::str::FromStr>(e: &BytesStart<'_>, name: &str) -> Result<T, SlideError> {
    attr(e, name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SlideError::Decode(format!("OME XML: missing or invalid {} attribute", name)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Experimenter ID="Experimenter:0" UserName="olympus"/>
  <Instrument ID="Instrument:0">
    <Microscope Manufacturer="Olympus" Model="VS200"/>
    <LightSource ID="LightSource:0" Manufacturer="Olympus" Model="X-Cite"/>
  </Instrument>
  <Image ID="Image:0">
    <AcquisitionDate>2021-06-11T09:51:12</AcquisitionDate>
    <Pixels ID="Pixels:0" SizeX="4096" SizeY="3072" SizeZ="1"
            PhysicalSizeX="0.325" PhysicalSizeY="0.325" Type="uint8">
      <Channel ID="Channel:0:0" Name="DAPI" EmissionWavelength="461" Color="255"/>
      <Channel ID="Channel:0:1" Name="FITC" EmissionWavelength="519" Color="65280"/>
      <Plane TheC="0" TheT="0" TheZ="0" ExposureTime="12.5"/>
      <Plane TheC="1" TheT="0" TheZ="0" ExposureTime="30.0"/>
    </Pixels>
  </Image>
  <Image ID="Image:1">
    <AcquisitionDate>2021-06-11T09:51:12</AcquisitionDate>
    <Pixels ID="Pixels:1" SizeX="2048" SizeY="1536"
            PhysicalSizeX="0.65" PhysicalSizeY="0.65" Type="uint8">
      <Channel ID="Channel:1:0" Name="DAPI"/>
      <Channel ID="Channel:1:1" Name="FITC"/>
    </Pixels>
  </Image>
</OME>"#;

    #[test]
    fn test_parse_sample() {
        let desc = OmeDescription::parse(SAMPLE).unwrap();

        assert_eq!(desc.experimenter_user_name.as_deref(), Some("olympus"));
        assert_eq!(desc.microscope_manufacturer.as_deref(), Some("Olympus"));
        assert_eq!(desc.microscope_model.as_deref(), Some("VS200"));
        assert_eq!(desc.images.len(), 2);
        assert_eq!(desc.channel_count(), 2);
    }

    #[test]
    fn test_parse_image_fields() {
        let desc = OmeDescription::parse(SAMPLE).unwrap();
        let img = &desc.images[0];

        assert_eq!(img.acquisition_date.as_deref(), Some("2021-06-11T09:51:12"));
        assert_eq!((img.size_x, img.size_y), (4096, 3072));
        assert_eq!(img.physical_size_x, Some(0.325));
        assert_eq!(img.physical_size_y, Some(0.325));
        assert_eq!(img.exposure_times, vec![12.5, 30.0]);

        assert_eq!(img.channels.len(), 2);
        assert_eq!(img.channels[0].name.as_deref(), Some("DAPI"));
        assert_eq!(img.channels[0].emission_wavelength, Some(461));
        assert_eq!(img.channels[1].color, Some(65280));
    }

    #[test]
    fn test_parse_second_image() {
        let desc = OmeDescription::parse(SAMPLE).unwrap();
        let img = &desc.images[1];
        assert_eq!((img.size_x, img.size_y), (2048, 1536));
        assert_eq!(img.channels[0].emission_wavelength, None);
    }

    #[test]
    fn test_parse_no_images() {
        let xml = r#"<OME><Experimenter UserName="olympus"/></OME>"#;
        assert!(matches!(
            OmeDescription::parse(xml),
            Err(SlideError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_missing_size_attr() {
        let xml = r#"<OME><Image><Pixels SizeX="100"/></Image></OME>"#;
        let err = OmeDescription::parse(xml).unwrap_err();
        assert!(err.to_string().contains("SizeY"));
    }

    #[test]
    fn test_parse_not_xml() {
        // quick-xml tolerates leading garbage as text, so a plain string
        // parses but yields no images
        let result = OmeDescription::parse("Aperio Image Library v12.0.0");
        assert!(result.is_err());
    }

    #[test]
    fn test_channel_count_defaults_to_one() {
        let xml = r#"<OME><Image><Pixels SizeX="10" SizeY="10"/></Image></OME>"#;
        let desc = OmeDescription::parse(xml).unwrap();
        assert_eq!(desc.channel_count(), 1);
    }
}
