//! GeoTIFF writer for tile rasters
//!
//! Writes [`GeoRaster`] data as float32 GeoTIFF with georeferencing (pixel
//! scale + tiepoint for north-up grids, a full model transformation
//! otherwise), the EPSG code as GeoKeys, and the nodata value in the GDAL
//! nodata tag. Pure Rust, no GDAL.
//!
//! # Example
//!
//! ```rust,no_run
//! use tilegrid::{GeoRaster, GeoTransform};
//! use tilegrid::geotiff_writer::{GeoTiffCompression, GeoTiffWriter};
//!
//! # fn main() -> tilegrid::Result<()> {
//! let band = vec![0.0_f32; 256 * 256];
//! let transform = GeoTransform::north_up(-46.7, -23.5, 0.0001, 0.0001);
//! let raster = GeoRaster::from_planes(&[&band], 256, 256, transform, 4326, Some(-9999.0))?;
//!
//! GeoTiffWriter::new(&raster)
//!     .compression(GeoTiffCompression::Deflate)
//!     .write("tile.tif")?;
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tiff::encoder::colortype::{Gray32Float, RGB32Float};
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;

use crate::casting::usize_to_u32;
use crate::error::{Result, TileGridError};
use crate::geometry::projection::{get_proj_string, is_geographic_crs};
use crate::raster::{BandName, GeoRaster};

/// GDAL_METADATA, where GDAL keeps per-band descriptions
const GDAL_METADATA_TAG: u16 = 42112;

// GeoKey IDs
pub(crate) const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    #[default]
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    Deflate,
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    raster: &'a GeoRaster,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    #[must_use]
    pub fn new(raster: &'a GeoRaster) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
        }
    }

    /// Set the compression method. Rasters with other than 1 or 3 bands are
    /// always written uncompressed.
    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write to a file path
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be created, or `Encoding` on encoder failure.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        self.write_to(writer)
    }

    /// Write to any writer that implements Write + Seek
    ///
    /// # Errors
    /// Returns `InvalidData` for an empty or inconsistent raster, or
    /// `Encoding` on encoder failure.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let raster = self.raster;

        if raster.width == 0 || raster.height == 0 || raster.bands == 0 {
            return Err(TileGridError::invalid_data("Raster has zero dimensions"));
        }
        if raster.pixels.len() != raster.width * raster.height * raster.bands {
            return Err(TileGridError::invalid_data(format!(
                "Raster has {} values, expected {}x{}x{}",
                raster.pixels.len(),
                raster.width,
                raster.height,
                raster.bands
            )));
        }

        let width = usize_to_u32(raster.width)?;
        let height = usize_to_u32(raster.height)?;

        let compression = match self.compression {
            GeoTiffCompression::None => Compression::Uncompressed,
            GeoTiffCompression::Lzw => Compression::Lzw,
            GeoTiffCompression::Deflate => Compression::Deflate(tiff::encoder::DeflateLevel::Fast),
        };

        let encoder = TiffEncoder::new(writer)?.with_compression(compression);
        self.write_image(encoder, width, height)
    }

    fn write_image<W: Write + Seek>(
        &self,
        mut encoder: TiffEncoder<W>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        // Four-band tiles carry NIR, not alpha, so only gray and RGB use the
        // high-level color types.
        match self.raster.bands {
            1 => {
                let mut image = encoder.new_image::<Gray32Float>(width, height)?;
                self.write_geotiff_tags(image.encoder())?;
                image.write_data(&self.raster.pixels)?;
            }
            3 => {
                let mut image = encoder.new_image::<RGB32Float>(width, height)?;
                self.write_geotiff_tags(image.encoder())?;
                image.write_data(&self.raster.pixels)?;
            }
            _ => self.write_multiband_image(encoder, width, height)?,
        }
        Ok(())
    }

    /// Arbitrary band counts via the low-level directory API, one
    /// uncompressed strip.
    fn write_multiband_image<W: Write + Seek>(
        &self,
        mut encoder: TiffEncoder<W>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let bands = self.raster.bands;
        let samples = u16::try_from(bands)
            .map_err(|_| TileGridError::Encoding(format!("{bands} bands exceed the TIFF sample limit")))?;

        let mut dir = encoder.image_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;

        let bits_per_sample: Vec<u16> = vec![32; bands];
        dir.write_tag(Tag::BitsPerSample, bits_per_sample.as_slice())?;

        // Strip data below is raw
        dir.write_tag(Tag::Compression, 1u16)?;

        // BlackIsZero: no color semantics for the extra bands
        dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
        dir.write_tag(Tag::SamplesPerPixel, samples)?;

        // IEEE floating point for each band
        let sample_format: Vec<u16> = vec![3; bands];
        dir.write_tag(Tag::SampleFormat, sample_format.as_slice())?;

        // Chunky (interleaved)
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::RowsPerStrip, height)?;

        if bands > 1 {
            let extra_samples: Vec<u16> = vec![0; bands - 1];
            dir.write_tag(Tag::ExtraSamples, extra_samples.as_slice())?;
        }

        self.write_geotiff_tags(&mut dir)?;

        // Tiles are always stacked Red, Green, Blue, NIR
        if bands == BandName::ALL.len() {
            dir.write_tag(Tag::Unknown(GDAL_METADATA_TAG), band_description_metadata().as_str())?;
        }

        let pixel_bytes: Vec<u8> = self
            .raster
            .pixels
            .iter()
            .flat_map(|&f| f.to_le_bytes())
            .collect();

        let strip_offset = dir.write_data(pixel_bytes.as_slice())?;
        let strip_offset = u32::try_from(strip_offset)
            .map_err(|_| TileGridError::Encoding("Strip offset exceeds classic TIFF range".to_string()))?;
        dir.write_tag(Tag::StripOffsets, strip_offset)?;
        dir.write_tag(Tag::StripByteCounts, usize_to_u32(pixel_bytes.len())?)?;

        dir.finish()?;
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    ) -> Result<()> {
        let raster = self.raster;
        let t = raster.transform;

        if t.is_north_up() {
            // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
            let pixel_scale = [t.a, -t.e, 0.0];
            dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

            // ModelTiepoint: pixel (0, 0) → transform origin
            let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
            dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;
        } else {
            let matrix = [
                t.a, t.b, 0.0, t.c, //
                t.d, t.e, 0.0, t.f, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(Tag::ModelTransformationTag, matrix.as_slice())?;
        }

        let geokeys = build_geokey_directory(raster.crs)?;
        dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;

        if let Some(proj_string) = get_proj_string(raster.crs) {
            let ascii_params = format!("{proj_string}|");
            dir.write_tag(Tag::GeoAsciiParamsTag, ascii_params.as_str())?;
        }

        if let Some(nodata) = raster.nodata {
            let text = format!("{nodata}");
            dir.write_tag(Tag::GdalNodata, text.as_str())?;
        }

        Ok(())
    }
}

fn band_description_metadata() -> String {
    let items: String = BandName::ALL
        .iter()
        .enumerate()
        .map(|(sample, band)| {
            format!(
                r#"<Item name="DESCRIPTION" sample="{sample}" role="description">{}</Item>"#,
                band.description()
            )
        })
        .collect();
    format!("<GDALMetadata>{items}</GDALMetadata>")
}

/// GeoKeyDirectory:
/// `[KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
///   KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]`
fn build_geokey_directory(crs: i32) -> Result<Vec<u16>> {
    let code = u16::try_from(crs)
        .map_err(|_| TileGridError::Encoding(format!("EPSG:{crs} does not fit a GeoKey")))?;
    let is_geographic = is_geographic_crs(crs);

    let mut keys = vec![1, 1, 0, 3];

    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if is_geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);

    if is_geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, code]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]);
    }

    Ok(keys)
}

impl GeoRaster {
    /// Write this raster to a GeoTIFF file.
    ///
    /// # Errors
    /// See [`GeoTiffWriter::write`].
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        GeoTiffWriter::new(self).write(path)
    }

    /// Encode this raster as GeoTIFF bytes, e.g. for an object store.
    ///
    /// # Errors
    /// See [`GeoTiffWriter::write_to`].
    pub fn to_geotiff_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        GeoTiffWriter::new(self).write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Encode as compressed GeoTIFF bytes.
    ///
    /// # Errors
    /// See [`GeoTiffWriter::write_to`].
    pub fn to_geotiff_bytes_compressed(&self, compression: GeoTiffCompression) -> Result<Vec<u8>> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        GeoTiffWriter::new(self)
            .compression(compression)
            .write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }
}
