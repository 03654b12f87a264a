//! Surface layer component
//!
//! A simple canopy-and-snowpack scheme: rainfall is split between the
//! canopy and direct throughfall by the vegetation fraction, the canopy
//! intercepts and re-evaporates part of its share, and the snowpack melts
//! above a threshold temperature.

use confluence_core::component::{
    Category, Component, ComponentDefinition, ConstantSpec, FinaliseContext, InitialiseContext,
    InputSpec, InwardSpec, OutwardSpec, RunContext, RunOutput, StateSpec, TransferMethod,
};
use confluence_core::errors::ConfluenceResult;
use ndarray::{Array2, Ix2, Zip};

const VAR_RAINFALL: &str = "rainfall";
const VAR_SNOWFALL: &str = "snowfall";
const VAR_AIR_TEMPERATURE: &str = "air_temperature";
const VAR_VEGETATION_FRACTION: &str = "vegetation_fraction";
const VAR_SOIL_WATER_STRESS: &str = "soil_water_stress";

/// Canopy interception and snowpack melt over the surface layer.
///
/// States:
/// - `canopy`: water held on the canopy (kg m-2)
/// - `snowpack`: lying snow mass (kg m-2)
///
/// Transfers `throughfall`, `snowmelt` and `transpiration` feed the
/// subsurface; `evaporation_openwater` feeds the open water component.
#[derive(Debug, Default)]
pub struct CanopySnow;

impl Component for CanopySnow {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::SurfaceLayer);
        definition.inwards = vec![InwardSpec::new(
            VAR_SOIL_WATER_STRESS,
            "1",
            Category::SubSurface,
            TransferMethod::Mean,
        )];
        definition.outwards = vec![
            OutwardSpec::new(
                "throughfall",
                "kg m-2 s-1",
                &[Category::SubSurface],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "snowmelt",
                "kg m-2 s-1",
                &[Category::SubSurface],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "transpiration",
                "kg m-2 s-1",
                &[Category::SubSurface],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "evaporation_openwater",
                "kg m-2 s-1",
                &[Category::OpenWater],
                TransferMethod::Mean,
            ),
        ];
        definition.inputs = vec![
            InputSpec::dynamic(VAR_RAINFALL, "kg m-2 s-1"),
            InputSpec::dynamic(VAR_SNOWFALL, "kg m-2 s-1"),
            InputSpec::dynamic(VAR_AIR_TEMPERATURE, "K"),
            InputSpec::static_(VAR_VEGETATION_FRACTION, "1"),
        ];
        definition.constants = vec![
            ConstantSpec::new("average_evaporation_rate", "kg m-2 s-1", 4.6e-5),
            ConstantSpec::new("melting_temperature", "K", 273.0),
            ConstantSpec::new("interception_fraction", "1", 0.25),
        ];
        definition.states = vec![
            StateSpec::new("canopy", "kg m-2"),
            StateSpec::new("snowpack", "kg m-2"),
        ];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("canopy").fill_timestep(-1, 5.0);
            ctx.states.get_mut("snowpack").fill_timestep(-1, 2.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let dt = ctx.step_seconds as f64;
        let rainfall = ctx.inputs.get(VAR_RAINFALL);
        let snowfall = ctx.inputs.get(VAR_SNOWFALL);
        let air_temperature = ctx.inputs.get(VAR_AIR_TEMPERATURE);
        let vegetation = ctx.inputs.get(VAR_VEGETATION_FRACTION);
        let stress = ctx.inwards.get(VAR_SOIL_WATER_STRESS);

        let evaporation_rate = ctx.constants.get("average_evaporation_rate");
        let melting_temperature = ctx.constants.get("melting_temperature");
        let interception_fraction = ctx.constants.get("interception_fraction");

        let canopy_before = ctx
            .states
            .get("canopy")
            .get_timestep(-1)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .expect("canopy is grid-shaped");
        let snowpack_before = ctx
            .states
            .get("snowpack")
            .get_timestep(-1)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .expect("snowpack is grid-shaped");

        let bare_fraction = vegetation.mapv(|v| 1.0 - v);
        let direct_rainfall = &bare_fraction * rainfall;
        let canopy_rainfall = rainfall - &direct_rainfall;

        let canopy_evaporation = &canopy_before / dt * 0.1;
        let interception = canopy_rainfall.mapv(|v| v * interception_fraction);
        let throughfall = &canopy_rainfall - &interception;
        let canopy = &canopy_before + &((&interception - &canopy_evaporation) * dt);

        let transpiration = (vegetation * stress) * evaporation_rate;
        let soil_evaporation = (&bare_fraction * stress) * evaporation_rate;

        let mut snowmelt = Array2::zeros(snowpack_before.dim());
        Zip::from(&mut snowmelt)
            .and(air_temperature)
            .and(&snowpack_before)
            .for_each(|melt, &t, &pack| {
                if t > melting_temperature {
                    *melt = pack * 0.10 / dt;
                }
            });
        let snowpack = &snowpack_before + &((snowfall - &snowmelt) * dt);

        ctx.states
            .get_mut("canopy")
            .set_timestep(0, &canopy.into_dyn());
        ctx.states
            .get_mut("snowpack")
            .set_timestep(0, &snowpack.into_dyn());

        let mut output = RunOutput::default();
        output
            .outwards
            .insert("throughfall".to_string(), &throughfall + &direct_rainfall);
        output.outwards.insert("snowmelt".to_string(), snowmelt);
        output
            .outwards
            .insert("transpiration".to_string(), transpiration);
        output
            .outwards
            .insert("evaporation_openwater".to_string(), soil_evaporation);
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_the_surface_layer_interface() {
        let definition = CanopySnow.definition();
        assert_eq!(definition.category, Category::SurfaceLayer);
        assert_eq!(definition.outwards.len(), 4);
        assert_eq!(definition.constants[0].default, 4.6e-5);
        assert!(definition
            .inwards
            .iter()
            .all(|i| i.from == Category::SubSurface));
    }
}
