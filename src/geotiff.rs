//! Minimal single-band GeoTIFF reader/writer on top of the `tiff` crate.
//!
//! Only north-up rasters described by ModelPixelScale (33550) and
//! ModelTiepoint (33922) are supported, which is what photogrammetry CHMs and
//! orthomosaics are exported as. A GDAL_NODATA tag (42113), when present, is
//! turned into NaN.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;

use log::{debug, warn};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::error::{Error, Result};
use crate::raster::Raster;

const GDAL_NODATA: u16 = 42113;

/// Pixel size and top-left origin: (res_x, res_y, origin_x, origin_y).
fn geotiff_extent_from_decoder<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> (f64, f64, f64, f64) {
    let mut res_x = 1.0_f64;
    let mut res_y = 1.0_f64;
    let mut origin_x = 0.0_f64;
    let mut origin_y = 0.0_f64;
    let mut found_scale = false;
    let mut found_tiepoint = false;

    if let Ok(Some(scale_val)) = decoder.find_tag(Tag::ModelPixelScaleTag) {
        if let Ok(scale) = scale_val.into_f64_vec() {
            if scale.len() >= 2 {
                res_x = scale[0];
                res_y = scale[1];
                found_scale = true;
            }
        }
    }
    if let Ok(Some(tie_val)) = decoder.find_tag(Tag::ModelTiepointTag) {
        if let Ok(tie) = tie_val.into_f64_vec() {
            if tie.len() >= 6 {
                // Tiepoint maps raster (i, j) to model (x, y); shift back to pixel (0, 0).
                origin_x = tie[3] - tie[0] * res_x;
                origin_y = tie[4] + tie[1] * res_y;
                found_tiepoint = true;
            }
        }
    }

    if !found_scale {
        warn!("{}: no ModelPixelScale tag, assuming 1.0 m cells", path.display());
    }
    if !found_tiepoint {
        warn!("{}: no ModelTiepoint tag, assuming origin (0, 0)", path.display());
    }
    debug!(
        "{}: res=({}, {}), origin=({:.2}, {:.2})",
        path.display(),
        res_x,
        res_y,
        origin_x,
        origin_y
    );

    (res_x, res_y, origin_x, origin_y)
}

fn nodata_from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let value = decoder.find_tag(Tag::Unknown(GDAL_NODATA)).ok()??;
    value.into_string().ok()?.trim_matches(char::from(0)).trim().parse().ok()
}

/// Read the first band of a GeoTIFF as a [`Raster`].
pub fn read_geotiff(path: &Path) -> Result<Raster> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let (width, height) = decoder.dimensions()?;
    let ncol = width as usize;
    let nrow = height as usize;

    let (res_x, res_y, origin_x, origin_y) = geotiff_extent_from_decoder(&mut decoder, path);
    let nodata = nodata_from_decoder(&mut decoder);

    let xmin = origin_x;
    let ymax = origin_y;
    let xmax = xmin + ncol as f64 * res_x;
    let ymin = ymax - nrow as f64 * res_y;

    let raw: Vec<f64> = match decoder.read_image()? {
        DecodingResult::F64(v) => v,
        DecodingResult::F32(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::U8(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::U16(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::I16(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::I32(v) => v.iter().map(|x| *x as f64).collect(),
        _ => {
            return Err(Error::UnsupportedRaster {
                path: path.to_path_buf(),
                reason: "pixel format".into(),
            })
        }
    };

    let total_pixels = nrow * ncol;
    if total_pixels == 0 || raw.len() % total_pixels != 0 {
        return Err(Error::UnsupportedRaster {
            path: path.to_path_buf(),
            reason: format!("{} samples for {}x{} pixels", raw.len(), ncol, nrow),
        });
    }
    let n_bands = raw.len() / total_pixels;
    if n_bands > 1 {
        debug!("{}: {} interleaved bands, using band 0", path.display(), n_bands);
    }

    let band: Vec<f64> = (0..total_pixels)
        .map(|px| raw[px * n_bands])
        .map(|v| match nodata {
            Some(nd) if v == nd => f64::NAN,
            _ => v,
        })
        .collect();

    Ok(Raster::from_vec(nrow, ncol, band).with_extent(xmin, xmax, ymin, ymax))
}

/// Write a raster as a single-band 64-bit float GeoTIFF (NaN = no data).
pub fn write_geotiff(path: &Path, raster: &Raster) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image =
        encoder.new_image::<colortype::Gray64Float>(raster.ncol as u32, raster.nrow as u32)?;

    let scale = [raster.res_x, raster.res_y, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, raster.xmin, raster.ymax, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    image
        .encoder()
        .write_tag(Tag::Unknown(GDAL_NODATA), "nan")?;
    image.write_data(&raster.data)?;
    Ok(())
}
